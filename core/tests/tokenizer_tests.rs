use sitesearch_core::tokenizer::split;

#[test]
fn it_normalizes_and_lowercases() {
    let words = split("Café MENU ﬁne", "en");
    assert_eq!(words, vec!["café", "menu", "fine"]);
}

#[test]
fn it_keeps_every_word_in_order() {
    let words = split("The quick brown fox and the lazy dog", "en");
    assert_eq!(words.first().map(String::as_str), Some("the"));
    assert_eq!(words.len(), 8);
    assert_eq!(words[4], "and");
}

#[test]
fn rejoined_output_splits_to_itself() {
    let text = "Über 3 Brücken gehen wir heute";
    let first = split(text, "de");
    let second = split(&first.join(" "), "de");
    assert_eq!(first, second);
}

#[test]
fn it_is_deterministic_per_locale() {
    let text = "Qu'il vienne à l'école";
    assert_eq!(split(text, "fr"), split(text, "fr"));
    assert_eq!(split(text, "fr"), vec!["il", "vienne", "à", "école"]);
    assert_eq!(split(text, "en"), vec!["qu'il", "vienne", "à", "l'école"]);
}

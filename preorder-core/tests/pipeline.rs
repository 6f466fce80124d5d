//! End-to-end check: load factored input and alignments, train a model,
//! roundtrip it through a file, and reorder the training sentences with it.

use std::fs;
use std::path::Path;

use preorder_core::{
    create_trainer, load_examples, load_sentences, Model, OutputFormat, Parser, Strategy,
    TrainOptions, Trainer,
};

fn write_corpus(dir: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let input = dir.join("input.txt");
    let align = dir.join("align.txt");
    fs::write(&input, "a b c\nd e\n").unwrap();
    fs::write(&align, "3-3 ||| 0-2 1-1 2-0\n2-2 ||| 0-1 1-0\n").unwrap();
    (input, align)
}

#[test]
fn train_save_load_and_reorder() {
    let dir = tempfile::tempdir().unwrap();
    let (input, align) = write_corpus(dir.path());

    let sentences = load_sentences(&input, 1).unwrap();
    assert_eq!(sentences.len(), 2);
    let mut examples = load_examples(&align, sentences.clone()).unwrap();
    assert_eq!(examples.len(), 2);

    let options = TrainOptions {
        strategy: Strategy::Online,
        iterations: 40,
        threads: 1,
        factors: 1,
        early_stop: true,
        shuffle: true,
        ..TrainOptions::default()
    };
    let beam = options.beam;
    let trainer = create_trainer(options);
    let mut model = Model::new();
    trainer.train(&mut examples, &mut model).unwrap();

    let model_path = dir.path().join("model.bin");
    model.write(&model_path).unwrap();
    let model = Model::read(&model_path).unwrap();

    // Both training sentences are fully inverted; the trained model must
    // reproduce that without a constraint.
    let parser = Parser::new(beam);
    let lines = parser.permute(&sentences, OutputFormat::Order, &model);
    assert_eq!(lines, vec!["2 1 0 ".to_string(), "1 0 ".to_string()]);
}

#[test]
fn action_format_renders_one_transition_per_split() {
    let dir = tempfile::tempdir().unwrap();
    let (input, _) = write_corpus(dir.path());
    let sentences = load_sentences(&input, 1).unwrap();

    let parser = Parser::new(20);
    let lines = parser.permute(&sentences, OutputFormat::Action, &Model::new());
    assert_eq!(lines.len(), 2);
    // n tokens take n-1 transitions.
    assert_eq!(lines[0].split(' ').count(), 2);
    assert_eq!(lines[1].split(' ').count(), 1);
    for token in lines.iter().flat_map(|l| l.split(' ')) {
        let (pivot, orientation) = token.split_once('-').unwrap();
        pivot.parse::<usize>().unwrap();
        assert!(orientation == "0" || orientation == "1");
    }
}

#[test]
fn unusable_alignments_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.txt");
    let align = dir.path().join("align.txt");
    fs::write(&input, "a b c\nd e\nf g h i\nj k\n").unwrap();
    // Line 2: incomparable target sets. Line 3: the [2,0,3,1] order has no
    // binary bracketing. Line 4: no links at all.
    fs::write(
        &align,
        "3-3 ||| 0-0 1-1 2-2\n\
         2-3 ||| 0-0 0-2 1-1\n\
         4-4 ||| 0-2 1-0 2-3 3-1\n\
         2-2 ||| \n",
    )
    .unwrap();

    let sentences = load_sentences(&input, 1).unwrap();
    let examples = load_examples(&align, sentences).unwrap();
    assert_eq!(examples.len(), 1);
}

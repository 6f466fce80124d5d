use crate::fingerprint::{empty_token, mix, mix3, mix4, mix5, salts, Fingerprint};
use crate::parser::{ParserAction, ParserSpan};
use crate::sentence::Sentence;

/// Upper bound on the number of features one split can produce. The template
/// below emits 6 structural features plus 24 per lexical factor, so three
/// factors stay well under the bound; exceeding it means the template and the
/// salt table went out of sync.
pub const MAX_FEATURES: usize = 120;

/// Spans wider than this share one size bucket.
const MAX_SPAN_SIZE: u64 = 100;
/// Child sizes are clipped here.
const MAX_CHILD_SIZE: u64 = 5;

/// Extract the feature fingerprints describing the split of `span` at
/// `pivot`, in the context of the action that created the span (`parent`,
/// `None` for the root span).
///
/// Pure function of its arguments; both orientations of the candidate action
/// share the same features and differ only in which weight table scores them.
pub fn extract(
    sentence: &Sentence,
    parent: Option<&ParserAction>,
    span: &ParserSpan,
    pivot: usize,
    features: &mut Vec<Fingerprint>,
) {
    let salts = salts();
    let fp_empty = empty_token();
    let mut id = 0;
    let mut salt = || {
        let s = salts[id];
        id += 1;
        s
    };
    features.clear();

    let lb = span.begin; // left child [lb, le)
    let le = pivot;
    let rb = pivot; // right child [rb, re)
    let re = span.end;
    let len = sentence.len();

    let total = (re - lb) as u64;
    let sn = total.min(MAX_SPAN_SIZE - 1);
    let ln = (le - lb) as u64;
    let rn = (re - rb) as u64;
    let balance = if rn < ln {
        0u64
    } else if rn > ln {
        1
    } else {
        2
    };
    let nln = ln.min(MAX_CHILD_SIZE);
    let nrn = rn.min(MAX_CHILD_SIZE);

    // Parent orientation and which child of the parent this span is; the root
    // span uses sentinel values outside the 0/1 range.
    let (gp_nt, gp_side) = match parent {
        None => (2u64, 2u64),
        Some(action) => (
            action.orientation.index() as u64,
            (span.begin == action.pivot) as u64,
        ),
    };

    features.push(salt());
    features.push(mix(salt(), balance));
    features.push(mix(salt(), sn));
    features.push(mix3(salt(), nln, nrn));
    features.push(mix(salt(), gp_nt));
    features.push(mix3(salt(), gp_nt, gp_side));

    for k in 0..sentence.factors() {
        let tok = |pos: usize| sentence.factor(pos, k);
        // Tokens at the four child boundaries plus their outside neighbors.
        let ll_out = if lb >= 1 { tok(lb - 1) } else { fp_empty };
        let ll = tok(lb);
        let lr = tok(le - 1);
        let rl = tok(rb);
        let rr = tok(re - 1);
        let rr_out = if re < len { tok(re) } else { fp_empty };
        let lr_in = if le >= 2 { tok(le - 2) } else { fp_empty };
        let rl_in = if rb + 1 < len { tok(rb + 1) } else { fp_empty };

        features.push(mix(salt(), ll_out));
        features.push(mix(salt(), ll));
        features.push(mix(salt(), lr));
        features.push(mix(salt(), rl));
        features.push(mix(salt(), rr));
        features.push(mix(salt(), rr_out));

        features.push(mix3(salt(), ll_out, ll));
        features.push(mix3(salt(), ll, lr));
        features.push(mix3(salt(), ll, rl));
        features.push(mix3(salt(), ll, rr));
        features.push(mix3(salt(), lr, rl));
        features.push(mix3(salt(), lr, rr));
        features.push(mix3(salt(), rl, rr));
        features.push(mix3(salt(), rr, rr_out));

        features.push(mix4(salt(), lr_in, lr, rl));
        features.push(mix4(salt(), ll, lr, rl));
        features.push(mix4(salt(), lr, rl, rr));
        features.push(mix4(salt(), lr, rl, rl_in));

        features.push(mix5(salt(), ll, lr, rl, rr));

        features.push(mix4(salt(), gp_nt, gp_side, ll));
        features.push(mix4(salt(), gp_nt, gp_side, lr));
        features.push(mix4(salt(), gp_nt, gp_side, rl));
        features.push(mix4(salt(), gp_nt, gp_side, rr));
        features.push(mix5(salt(), gp_nt, gp_side, ll, rr));
    }
    assert!(
        features.len() <= MAX_FEATURES,
        "feature template produced {} features, more than {}",
        features.len(),
        MAX_FEATURES
    );
}

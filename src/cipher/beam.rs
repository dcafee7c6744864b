//! Beam search over letter maps, guided by the n-gram model
//!
//! Each retained clustering is decoded independently: starting from a
//! letter-frequency initialization, the beam expands every hypothesis by
//! all single letter reassignments and pairwise letter swaps, keeps the
//! top-scoring maps, and stops once the best score stalls. A final
//! `refine_nearby` pass polishes the winner.

use tracing::trace;

use crate::cancel::CancelToken;
use crate::cipher::{decode_symbols, Clustering, Letter, LETTER_UNASSIGNED, N_LETTERS};
use crate::config::DecodeConfig;
use crate::error::{PipelineError, Result};
use crate::ngram::FreqMap;

/// English letters by descending frequency, as symbol indices; space
/// leads as the most common character overall.
const FREQ_ORDER: [Letter; N_LETTERS] = [
    0, 5, 20, 1, 15, 9, 14, 19, 18, 8, 12, 4, 3, 21, 13, 6, 7, 16, 23, 25, 2, 22, 11, 24, 10,
    17, 26,
];

/// Search for the letter map maximizing the joint score
/// `p = wEnglishFreq * logP_lm + wAcoustic * pClusters`.
///
/// On success the clustering's `letter_map` and `p` hold the best
/// hypothesis found.
pub fn beam_search(
    clustering: &mut Clustering,
    model: &FreqMap,
    config: &DecodeConfig,
    hint: &[i8],
    cancel: &CancelToken,
) -> Result<()> {
    let n = clustering.clusters.len();
    if n < model.order() {
        return Err(PipelineError::Degenerate {
            have: n,
            need: model.order(),
        });
    }

    let used = used_clusters(clustering);
    let width = config.beam_width(n);

    let init = initial_map(clustering, &used, hint);
    let score = |map: &[Letter]| -> f64 {
        let symbols = decode_symbols(&clustering.clusters, map, hint);
        config.w_english_freq * model.score(&symbols) + config.w_acoustic * clustering.p_clusters
    };

    let mut beam: Vec<(f64, Vec<Letter>)> = vec![(score(&init), init)];
    let mut best_p = beam[0].0;
    let mut stalled = 0;

    while stalled < config.convergence_rounds {
        cancel.check()?;

        let mut candidates: Vec<Vec<Letter>> =
            beam.iter().map(|(_, map)| map.clone()).collect();
        for (_, map) in &beam {
            expand(map, &used, &mut candidates);
        }

        candidates.sort_unstable();
        candidates.dedup();

        let mut scored: Vec<(f64, Vec<Letter>)> = candidates
            .into_iter()
            .map(|map| (score(&map), map))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
        scored.truncate(width);

        // the previous beam is part of the candidate set, so the top
        // score never decreases
        if scored[0].0 > best_p {
            best_p = scored[0].0;
            stalled = 0;
        } else {
            stalled += 1;
        }
        trace!("beam round: best p = {:.3}, beam = {}", best_p, scored.len());

        beam = scored;
    }

    let (p, map) = beam.swap_remove(0);
    clustering.letter_map = map;
    clustering.p = p;
    Ok(())
}

/// Exhaustive local pass on the current best map: apply the best
/// improving swap or reassignment until none is left.
pub fn refine_nearby(
    clustering: &mut Clustering,
    model: &FreqMap,
    config: &DecodeConfig,
    hint: &[i8],
    cancel: &CancelToken,
) -> Result<()> {
    let n = clustering.clusters.len();
    if n < model.order() {
        return Err(PipelineError::Degenerate {
            have: n,
            need: model.order(),
        });
    }

    let used = used_clusters(clustering);
    let score = |map: &[Letter]| -> f64 {
        let symbols = decode_symbols(&clustering.clusters, map, hint);
        config.w_english_freq * model.score(&symbols) + config.w_acoustic * clustering.p_clusters
    };

    let mut current = clustering.letter_map.clone();
    let mut current_p = score(&current);

    loop {
        cancel.check()?;

        let mut candidates = Vec::new();
        expand(&current, &used, &mut candidates);

        let mut best_move: Option<(f64, Vec<Letter>)> = None;
        for map in candidates {
            let p = score(&map);
            if p > current_p && best_move.as_ref().map(|(bp, _)| p > *bp).unwrap_or(true) {
                best_move = Some((p, map));
            }
        }

        match best_move {
            Some((p, map)) => {
                current_p = p;
                current = map;
            }
            None => break,
        }
    }

    clustering.letter_map = current;
    clustering.p = current_p;
    Ok(())
}

/// Distinct cluster ids ordered by occupancy (descending, ties by id)
fn used_clusters(clustering: &Clustering) -> Vec<u32> {
    let mut counts = vec![0usize; clustering.letter_map.len()];
    for &c in &clustering.clusters {
        counts[c as usize] += 1;
    }

    let mut used: Vec<u32> = (0..counts.len() as u32)
        .filter(|&c| counts[c as usize] > 0)
        .collect();
    used.sort_by_key(|&c| (std::cmp::Reverse(counts[c as usize]), c));
    used
}

/// Letter-frequency prior initialization: the most frequent cluster gets
/// the most frequent letter, cycling when there are more clusters than
/// letters. Hinted presses override their cluster's slot.
fn initial_map(clustering: &Clustering, used: &[u32], hint: &[i8]) -> Vec<Letter> {
    let mut map = vec![LETTER_UNASSIGNED; clustering.letter_map.len()];
    for (rank, &c) in used.iter().enumerate() {
        map[c as usize] = FREQ_ORDER[rank % N_LETTERS];
    }

    for (i, &h) in hint.iter().enumerate() {
        if h >= 0 && i < clustering.clusters.len() {
            map[clustering.clusters[i] as usize] = h as Letter;
        }
    }

    map
}

/// All single moves from `map`: reassign one used cluster to any other
/// letter, or swap the letters of two used clusters.
fn expand(map: &[Letter], used: &[u32], out: &mut Vec<Vec<Letter>>) {
    for &c in used {
        let c = c as usize;
        for letter in 0..N_LETTERS as Letter {
            if letter != map[c] {
                let mut next = map.to_vec();
                next[c] = letter;
                out.push(next);
            }
        }
    }

    for (a_idx, &a) in used.iter().enumerate() {
        for &b in &used[a_idx + 1..] {
            let (a, b) = (a as usize, b as usize);
            if map[a] != map[b] {
                let mut next = map.to_vec();
                next.swap(a, b);
                out.push(next);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::no_hints;
    use crate::ngram::{symbols_to_text, text_to_symbols};

    const TEXT: &str = "the cat sat on the mat and the rat sat on the hat ";

    /// Encode a plaintext as a cluster-id sequence (one cluster per
    /// distinct letter, ids by first appearance) and set up the clustering.
    fn ciphertext_of(text: &str, max_clusters: usize) -> (Clustering, Vec<Letter>) {
        let symbols = text_to_symbols(text);
        let mut seen: Vec<Letter> = Vec::new();
        let clusters: Vec<u32> = symbols
            .iter()
            .map(|&s| {
                if let Some(idx) = seen.iter().position(|&x| x == s) {
                    idx as u32
                } else {
                    seen.push(s);
                    (seen.len() - 1) as u32
                }
            })
            .collect();

        (Clustering::new(clusters, max_clusters, 0.0), symbols)
    }

    fn test_config() -> DecodeConfig {
        DecodeConfig {
            ngram_order: 3,
            n_hypotheses_to_keep: Some(300),
            convergence_rounds: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_degenerate_input() {
        let model = FreqMap::train(TEXT, 6);
        let mut clustering = Clustering::new(vec![0, 1, 2], 8, 0.0);
        let hint = no_hints(3);

        let err = beam_search(
            &mut clustering,
            &model,
            &DecodeConfig::default(),
            &hint,
            &CancelToken::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Degenerate { have: 3, need: 6 }
        ));
    }

    #[test]
    fn test_recovers_known_plaintext() {
        // four ciphertext symbols over a periodic plaintext; the bigram
        // model trained on the plaintext makes its letter map the unique
        // optimum
        let text = "ace ".repeat(25);
        let model = FreqMap::train(&text, 2);
        let (mut clustering, expected) = ciphertext_of(&text, 8);
        let hint = no_hints(expected.len());

        beam_search(
            &mut clustering,
            &model,
            &test_config(),
            &hint,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(
            symbols_to_text(&clustering.decode(&hint)),
            text,
            "p = {}",
            clustering.p
        );
    }

    #[test]
    fn test_hint_pins_press() {
        let model = FreqMap::train(TEXT, 3);
        let (mut clustering, expected) = ciphertext_of(TEXT, 16);
        let mut hint = no_hints(expected.len());
        // pin the first press to 'z', which the language model hates
        hint[0] = 26;

        beam_search(
            &mut clustering,
            &model,
            &test_config(),
            &hint,
            &CancelToken::new(),
        )
        .unwrap();

        assert_eq!(clustering.decode(&hint)[0], 26);
    }

    #[test]
    fn test_refine_does_not_regress() {
        let model = FreqMap::train(TEXT, 3);
        let (mut clustering, expected) = ciphertext_of(TEXT, 16);
        let hint = no_hints(expected.len());
        let config = test_config();

        beam_search(&mut clustering, &model, &config, &hint, &CancelToken::new()).unwrap();
        let p_before = clustering.p;

        refine_nearby(&mut clustering, &model, &config, &hint, &CancelToken::new()).unwrap();
        assert!(clustering.p >= p_before);
    }

    #[test]
    fn test_single_cluster_decodes_uniformly() {
        let model = FreqMap::train("eeeeeeeeee", 3);
        let mut clustering = Clustering::new(vec![0; 10], 4, 0.0);
        let hint = no_hints(10);

        beam_search(
            &mut clustering,
            &model,
            &test_config(),
            &hint,
            &CancelToken::new(),
        )
        .unwrap();

        let decoded = clustering.decode(&hint);
        assert!(decoded.iter().all(|&s| s == decoded[0]));
        assert_eq!(symbols_to_text(&decoded), "eeeeeeeeee");
    }

    #[test]
    fn test_cancellation() {
        let model = FreqMap::train(TEXT, 3);
        let (mut clustering, expected) = ciphertext_of(TEXT, 16);
        let hint = no_hints(expected.len());
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = beam_search(&mut clustering, &model, &test_config(), &hint, &cancel)
            .unwrap_err();
        assert!(matches!(err, PipelineError::Cancelled));
    }
}

//! Integration tests for keyecho

use std::time::{Duration, Instant};

use keyecho::audio::{find_key_presses, quantize};
use keyecho::cipher::{beam_search, no_hints, refine_nearby, Clusterer, Clustering};
use keyecho::config::{ClusterConfig, DecodeConfig, SegmenterConfig, SimilarityConfig};
use keyecho::ngram::{pack, symbols_to_text, text_to_symbols, FreqMap};
use keyecho::similarity::{compute_similarity, SimilarityMap};
use keyecho::{CancelToken, PipelineError};

/// Synthesize one decaying-sinusoid burst per plaintext character, each
/// distinct letter getting its own frequency.
fn synthesize(text: &str, spacing: usize) -> Vec<f32> {
    let symbols = text_to_symbols(text);
    let mut samples = vec![0.0f32; symbols.len() * spacing + spacing];
    for (k, &sym) in symbols.iter().enumerate() {
        let freq = 0.03 + 0.013 * sym as f32;
        let pos = spacing / 2 + k * spacing;
        for t in 0..400 {
            let decay = (-(t as f32) / 100.0).exp();
            samples[pos + t] += 0.6 * decay * (2.0 * std::f32::consts::PI * freq * t as f32).sin();
        }
    }
    samples
}

fn fast_cluster_config() -> ClusterConfig {
    ClusterConfig {
        clusterings_per_iteration: 8,
        mcmc_iterations: 20_000,
        seed: 3,
        ..Default::default()
    }
}

#[test]
fn test_synthetic_presses_through_all_stages() {
    // 25 x "ace " = 100 presses from four distinct "keys"
    let text = "ace ".repeat(25);
    let symbols = text_to_symbols(&text);
    let samples = synthesize(&text, 4000);
    let waveform = quantize(&samples);
    let cancel = CancelToken::new();

    // stage 1: every press is found
    let presses = find_key_presses(&waveform, &SegmenterConfig::default(), &cancel).unwrap();
    assert_eq!(presses.len(), 100);

    // stage 2: the similarity map is block structured
    let sim =
        compute_similarity(&waveform, &presses, &SimilarityConfig::default(), &cancel).unwrap();
    for i in 0..presses.len() {
        for j in i + 1..presses.len() {
            let cc = sim.cc(i, j);
            if symbols[i] == symbols[j] {
                assert!(cc > 0.9, "same key ({i},{j}): cc = {cc}");
            } else {
                assert!(cc < 0.75, "different keys ({i},{j}): cc = {cc}");
            }
        }
    }

    // stage 3: the best clustering recovers one cluster per key
    let clusterer = Clusterer::new(&sim);
    let clusterings = clusterer
        .clusterings(&fast_cluster_config(), 8, &cancel)
        .unwrap();
    let mut best = clusterings.into_iter().next().unwrap();
    assert_eq!(best.n_clusters(), 4);

    // stage 4: the beam decoder reads the text back
    let model = FreqMap::train(&text, 2);
    let decode = DecodeConfig {
        n_hypotheses_to_keep: Some(300),
        convergence_rounds: 2,
        ..Default::default()
    };
    let hint = no_hints(symbols.len());
    beam_search(&mut best, &model, &decode, &hint, &cancel).unwrap();
    refine_nearby(&mut best, &model, &decode, &hint, &cancel).unwrap();

    assert_eq!(symbols_to_text(&best.decode(&hint)), text);
}

#[test]
fn test_model_round_trip() {
    // synthetic 6-gram table with 100 entries
    let entries: Vec<(u64, f32)> = (0..100)
        .map(|i| (pack(&[0, 1, 2, 3, 4, (i % 27) as u8]) + i * 31, -(i as f32) / 7.0))
        .collect();
    let model = FreqMap::from_entries(6, -21.5, &entries);

    let file = tempfile::NamedTempFile::new().unwrap();
    model.save(file.path()).unwrap();
    let loaded = FreqMap::load(file.path(), 6).unwrap();

    assert_eq!(loaded.order(), 6);
    assert_eq!(loaded.floor(), model.floor());
    assert_eq!(loaded.entries(), model.entries());
}

#[test]
fn test_segmenter_impulse_spacing() {
    // 10 impulses at 500 ms spacing
    let spacing = 8000;
    let mut waveform = vec![0i16; 10 * spacing + spacing];
    for k in 0..10 {
        waveform[spacing / 2 + k * spacing] = 24000;
    }

    let presses =
        find_key_presses(&waveform, &SegmenterConfig::default(), &CancelToken::new()).unwrap();

    assert_eq!(presses.len(), 10);
    for (k, press) in presses.iter().enumerate() {
        let expected = spacing / 2 + k * spacing;
        // within 5 ms (80 samples at 16 kHz)
        assert!(
            press.pos.abs_diff(expected) <= 80,
            "press {k} at {} expected {expected}",
            press.pos
        );
    }
}

#[test]
fn test_clusterer_cancellation_is_prompt() {
    // a large, structureless map keeps the search busy
    let sim = SimilarityMap::from_cc(200, |i, j| 0.4 + 0.2 * (((i * 7 + j * 13) % 10) as f64) / 10.0);
    let config = ClusterConfig {
        mcmc_iterations: 50_000_000,
        ..Default::default()
    };
    let cancel = CancelToken::new();

    let canceller = {
        let cancel = cancel.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            cancel.cancel();
            Instant::now()
        })
    };

    let clusterer = Clusterer::new(&sim);
    let result = clusterer.clusterings(&config, 29, &cancel);
    let returned = Instant::now();

    let cancelled_at = canceller.join().unwrap();
    assert!(matches!(result, Err(PipelineError::Cancelled)));
    assert!(
        returned.duration_since(cancelled_at) < Duration::from_millis(200),
        "took {:?} after cancellation",
        returned.duration_since(cancelled_at)
    );
}

#[test]
fn test_beam_width_scaling() {
    let decode = DecodeConfig::default();
    assert_eq!(decode.beam_width(50), 2100);
    assert_eq!(decode.beam_width(300), 100);
}

#[test]
fn test_hint_pins_press_to_space() {
    let text = "ace ".repeat(25);
    let symbols = text_to_symbols(&text);

    // ciphertext straight from the known key sequence
    let mut seen: Vec<u8> = Vec::new();
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
    let mut clustering = Clustering::new(clusters, 8, 0.0);

    let model = FreqMap::train(&text, 2);
    let decode = DecodeConfig {
        n_hypotheses_to_keep: Some(300),
        convergence_rounds: 2,
        ..Default::default()
    };

    let mut hint = no_hints(symbols.len());
    hint[0] = 0; // press 0 is a space

    beam_search(
        &mut clustering,
        &model,
        &decode,
        &hint,
        &CancelToken::new(),
    )
    .unwrap();

    assert_eq!(clustering.decode(&hint)[0], 0);
}

#[test]
fn test_identical_presses_tie_across_all_letters() {
    // indistinguishable presses collapse to a single cluster
    let sim = SimilarityMap::from_cc(20, |_, _| 0.99);
    let clusterer = Clusterer::new(&sim);
    let clusterings = clusterer
        .clusterings(&fast_cluster_config(), 8, &CancelToken::new())
        .unwrap();
    let best = &clusterings[0];
    assert_eq!(best.n_clusters(), 1);

    // an empty table scores every n-gram at the floor, so the language
    // model has no letter preference
    let model = FreqMap::from_entries(2, -4.0, &[]);
    let decode = DecodeConfig {
        n_hypotheses_to_keep: Some(100),
        convergence_rounds: 2,
        ..Default::default()
    };
    let hint = no_hints(20);

    // the 27 single-letter readings (space-only plus one per letter) all
    // score identically
    let cluster_id = best.clusters[0] as usize;
    let scores: Vec<f64> = (0..27u8)
        .map(|letter| {
            let mut reading = best.clone();
            reading.letter_map[cluster_id] = letter;
            decode.w_english_freq * model.score(&reading.decode(&hint))
                + decode.w_acoustic * reading.p_clusters
        })
        .collect();
    for (letter, &p) in scores.iter().enumerate() {
        assert_eq!(p, scores[0], "letter {letter} breaks the tie");
    }

    // the beam settles on one of the tied readings, at the tied score
    let mut decoded = best.clone();
    beam_search(&mut decoded, &model, &decode, &hint, &CancelToken::new()).unwrap();
    assert_eq!(decoded.p, scores[0]);
    let symbols = decoded.decode(&hint);
    assert!(symbols.iter().all(|&s| s == symbols[0]));
}

#[test]
fn test_noisy_waveform_still_ranks() {
    // structureless low-similarity map: decoding degrades, never errors
    let sim = SimilarityMap::from_cc(40, |i, j| 0.02 + 0.01 * (((i + j) % 3) as f64));
    let (_, max) = sim.min_max_off_diagonal();
    assert!(max < 0.05);

    let clusterer = Clusterer::new(&sim);
    let clusterings = clusterer
        .clusterings(&fast_cluster_config(), 12, &CancelToken::new())
        .unwrap();
    assert!(!clusterings.is_empty());

    let model = FreqMap::train("the quick brown fox jumps over the lazy dog ", 2);
    let decode = DecodeConfig {
        n_hypotheses_to_keep: Some(100),
        convergence_rounds: 2,
        ..Default::default()
    };
    let hint = no_hints(40);

    let mut ranked: Vec<Clustering> = clusterings;
    for clustering in ranked.iter_mut() {
        beam_search(clustering, &model, &decode, &hint, &CancelToken::new()).unwrap();
    }
    ranked.sort_by(|a, b| b.p.total_cmp(&a.p));

    assert!(ranked[0].p >= ranked[ranked.len() - 1].p);
    assert!(ranked[0].p.is_finite());
}

//! The offline decoding pipeline
//!
//! Stages run strictly in sequence: pre-filter and quantize the waveform,
//! detect key presses, build the similarity map, cluster under a growing
//! cluster budget, then beam-decode every retained clustering. Parallelism
//! lives inside the stages; cancellation is checked between iterations
//! everywhere.

use std::time::Instant;

use rayon::prelude::*;
use tracing::{debug, info, trace};

use crate::audio::{find_key_presses, quantize, PreFilter, SAMPLE_RATE};
use crate::cancel::CancelToken;
use crate::cipher::{beam_search, no_hints, refine_nearby, Clusterer, Clustering};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::ngram::FreqMap;
use crate::similarity::compute_similarity;

/// Decode a float waveform into ranked plaintext hypotheses.
///
/// The returned clusterings are sorted by the joint score `p`, best first.
pub fn run(
    samples: &[f32],
    config: &Config,
    model: &FreqMap,
    cancel: &CancelToken,
) -> Result<Vec<Clustering>> {
    let mut samples = samples.to_vec();
    PreFilter::from_config(&config.filter).apply(&mut samples, SAMPLE_RATE)?;
    let waveform = quantize(&samples);

    let t_start = Instant::now();
    let presses = find_key_presses(&waveform, &config.segmenter, cancel)?;
    info!(
        "Key press search took {:.3}s ({} presses)",
        t_start.elapsed().as_secs_f32(),
        presses.len()
    );

    let n = presses.len();
    if n < model.order() {
        return Err(PipelineError::Degenerate {
            have: n,
            need: model.order(),
        });
    }

    let t_start = Instant::now();
    let sim = compute_similarity(&waveform, &presses, &config.similarity, cancel)?;
    info!(
        "Similarity map took {:.3}s",
        t_start.elapsed().as_secs_f32()
    );

    for j in 0..n.min(8) {
        let row: Vec<String> = (0..n.min(8)).map(|i| format!("{:5.2}", sim.cc(j, i))).collect();
        trace!("cc[{j}]: {}", row.join(" "));
    }

    let t_start = Instant::now();
    let clusterer = Clusterer::new(&sim);
    let mut clusterings = Vec::new();
    for iter in 0..config.cluster.outer_iterations {
        cancel.check()?;
        let max_clusters =
            config.cluster.max_clusters_start + config.cluster.max_clusters_step * iter;
        let batch = clusterer.clusterings(&config.cluster, max_clusters, cancel)?;
        if let Some(best) = batch.first() {
            debug!(
                "Clustering iteration {iter} (max {max_clusters}): best pClusters = {:.3}",
                best.p_clusters
            );
        }
        clusterings.extend(batch);
    }
    info!(
        "Clustering took {:.3}s ({} clusterings)",
        t_start.elapsed().as_secs_f32(),
        clusterings.len()
    );

    let mut hint = no_hints(n);

    let t_start = Instant::now();
    decode_all(&mut clusterings, model, config, &hint, cancel)?;

    if config.decode.hint_refinement {
        refine_hints(&mut clusterings, &clusterer, model, config, &mut hint, cancel)?;
    }
    info!("Decoding took {:.3}s", t_start.elapsed().as_secs_f32());

    clusterings.sort_by(|a, b| {
        b.p.total_cmp(&a.p)
            .then_with(|| a.clusters.cmp(&b.clusters))
    });

    Ok(clusterings)
}

/// Beam-decode every clustering independently
fn decode_all(
    clusterings: &mut [Clustering],
    model: &FreqMap,
    config: &Config,
    hint: &[i8],
    cancel: &CancelToken,
) -> Result<()> {
    clusterings
        .par_iter_mut()
        .map(|clustering| {
            beam_search(clustering, model, &config.decode, hint, cancel)?;
            refine_nearby(clustering, model, &config.decode, hint, cancel)
        })
        .collect::<Result<()>>()
}

/// Promote per-press letters that nearly all hypotheses agree on to hints,
/// merge presses sharing a hint into one cluster, and decode again. Stops
/// when a pass changes no hint.
fn refine_hints(
    clusterings: &mut Vec<Clustering>,
    clusterer: &Clusterer,
    model: &FreqMap,
    config: &Config,
    hint: &mut [i8],
    cancel: &CancelToken,
) -> Result<()> {
    let n = hint.len();
    let quorum = (0.90 * clusterings.len() as f64) as usize;

    for round in 0..10 {
        cancel.check()?;

        let mut counts = vec![[0usize; 28]; n];
        for clustering in clusterings.iter() {
            for (j, &letter) in clustering.decode(hint).iter().enumerate() {
                counts[j][letter as usize] += 1;
            }
        }

        let mut changed = false;
        for j in 0..n {
            let (letter, count) = counts[j]
                .iter()
                .enumerate()
                .max_by_key(|&(_, &c)| c)
                .map(|(l, &c)| (l as u8, c))
                .unwrap_or((27, 0));

            if count > quorum && letter != 27 && hint[j] != letter as i8 {
                debug!("hint round {round}: pinning press {j} to letter {letter}");
                hint[j] = letter as i8;
                changed = true;
            }
        }

        if !changed {
            break;
        }

        // presses pinned to the same letter must come from the same key
        for clustering in clusterings.iter_mut() {
            for j in 0..n {
                if hint[j] < 0 {
                    continue;
                }
                for k in j + 1..n {
                    if hint[k] == hint[j] {
                        clustering.clusters[k] = clustering.clusters[j];
                    }
                }
            }
            clustering.p_clusters = clusterer.score(&clustering.clusters);
        }

        decode_all(clusterings, model, config, hint, cancel)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClusterConfig, DecodeConfig, FilterConfig, FilterKind};
    use crate::ngram::text_to_symbols;

    /// Distinct decaying-sinusoid burst per key, one burst per plaintext
    /// character, spaced well apart.
    fn synthesize(text: &str, spacing: usize) -> Vec<f32> {
        let symbols = text_to_symbols(text);
        let mut samples = vec![0.0f32; symbols.len() * spacing + spacing];
        for (k, &sym) in symbols.iter().enumerate() {
            let freq = 0.03 + 0.013 * sym as f32;
            let pos = spacing / 2 + k * spacing;
            for t in 0..400 {
                let decay = (-(t as f32) / 100.0).exp();
                samples[pos + t] +=
                    0.6 * decay * (2.0 * std::f32::consts::PI * freq * t as f32).sin();
            }
        }
        samples
    }

    fn fast_config() -> Config {
        Config {
            filter: FilterConfig {
                kind: FilterKind::None,
                ..Default::default()
            },
            cluster: ClusterConfig {
                max_clusters_start: 8,
                outer_iterations: 2,
                clusterings_per_iteration: 4,
                mcmc_iterations: 20_000,
                seed: 11,
                ..Default::default()
            },
            decode: DecodeConfig {
                ngram_order: 2,
                n_hypotheses_to_keep: Some(300),
                convergence_rounds: 2,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_end_to_end_recovery() {
        let text = "ace ".repeat(25);
        let samples = synthesize(&text, 4000);
        let config = fast_config();
        let model = FreqMap::train(&text, 2);

        let hypotheses = run(&samples, &config, &model, &CancelToken::new()).unwrap();
        assert!(!hypotheses.is_empty());

        let best = &hypotheses[0];
        let hint = no_hints(best.clusters.len());
        assert_eq!(best.decoded_marked(&hint), text);
    }

    #[test]
    fn test_degenerate_when_too_few_presses() {
        let samples = synthesize("abc", 4000);
        let config = fast_config();
        let model = FreqMap::train("abc abc", 6);

        let err = run(&samples, &config, &model, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Degenerate { have: 3, need: 6 }));
    }

    #[test]
    fn test_silence_reports_no_presses() {
        let config = fast_config();
        let model = FreqMap::train("abc abc", 2);

        let err = run(&vec![0.0; 32000], &config, &model, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, PipelineError::NoPresses));
    }

    #[test]
    fn test_deterministic_given_seed() {
        let text = "ace ".repeat(20);
        let samples = synthesize(&text, 4000);
        let config = fast_config();
        let model = FreqMap::train(&text, 2);

        let a = run(&samples, &config, &model, &CancelToken::new()).unwrap();
        let b = run(&samples, &config, &model, &CancelToken::new()).unwrap();

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.clusters, y.clusters);
            assert_eq!(x.letter_map, y.letter_map);
            assert_eq!(x.p.to_bits(), y.p.to_bits());
        }
    }
}

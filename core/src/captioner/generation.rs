//! Logit adjustments and beam search used while decoding captions.

/// Penalise tokens that were already generated.
///
/// Positive logits are divided by `penalty`, negative ones multiplied, so a
/// penalty above 1.0 always makes a repeat less likely.
pub fn apply_repetition_penalty(logits: &mut [f32], generated: &[i64], penalty: f32) {
    if penalty == 1.0 {
        return;
    }
    let mut seen = generated.to_vec();
    seen.sort_unstable();
    seen.dedup();
    for id in seen {
        if let Some(score) = usize::try_from(id).ok().and_then(|i| logits.get_mut(i)) {
            *score = if *score < 0.0 {
                *score * penalty
            } else {
                *score / penalty
            };
        }
    }
}

/// Forbid any token that would complete an n-gram already present in
/// `generated`.
pub fn ban_repeated_ngrams(logits: &mut [f32], generated: &[i64], ngram_size: usize) {
    if ngram_size == 0 || generated.len() < ngram_size {
        return;
    }
    let prefix = &generated[generated.len() + 1 - ngram_size..];
    for window in generated.windows(ngram_size) {
        if &window[..ngram_size - 1] == prefix {
            let banned = window[ngram_size - 1];
            if let Some(score) = usize::try_from(banned).ok().and_then(|i| logits.get_mut(i)) {
                *score = f32::NEG_INFINITY;
            }
        }
    }
}

/// Natural-log softmax, ignoring `-inf` entries.
pub fn log_softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits
        .iter()
        .copied()
        .filter(|value| value.is_finite())
        .fold(f32::NEG_INFINITY, f32::max);
    if !max.is_finite() {
        return vec![f32::NEG_INFINITY; logits.len()];
    }
    let sum: f32 = logits
        .iter()
        .filter(|value| value.is_finite())
        .map(|value| (value - max).exp())
        .sum();
    let log_sum = sum.ln() + max;
    logits
        .iter()
        .map(|value| {
            if value.is_finite() {
                value - log_sum
            } else {
                f32::NEG_INFINITY
            }
        })
        .collect()
}

/// Settings for [`beam_search`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchParams {
    pub num_beams: usize,
    pub max_length: usize,
    pub start_token_id: i64,
    pub end_token_id: i64,
    pub repetition_penalty: f32,
    pub no_repeat_ngram_size: usize,
}

#[derive(Clone, Debug)]
struct Hypothesis {
    ids: Vec<i64>,
    score: f32,
}

impl Hypothesis {
    /// Summed log-probability divided by length.
    fn normalized(&self) -> f32 {
        self.score / self.ids.len() as f32
    }
}

/// Beam search over a decoder.
///
/// `next_logits` returns the logits of the token following `ids`. Each
/// hypothesis gets its own repetition penalty and n-gram ban before the
/// log-softmax scores are summed. With one beam this is greedy decoding.
/// The returned ids start with the start token and never contain the end
/// token.
pub fn beam_search<F, E>(params: &SearchParams, mut next_logits: F) -> Result<Vec<i64>, E>
where
    F: FnMut(&[i64]) -> Result<Vec<f32>, E>,
{
    let num_beams = params.num_beams.max(1);
    let mut beams = vec![Hypothesis {
        ids: vec![params.start_token_id],
        score: 0.0,
    }];
    let mut finished: Vec<Hypothesis> = Vec::new();

    for _ in 0..params.max_length {
        let mut candidates: Vec<(usize, i64, f32)> = Vec::new();
        for (beam_index, beam) in beams.iter().enumerate() {
            let mut logits = next_logits(&beam.ids)?;
            apply_repetition_penalty(&mut logits, &beam.ids, params.repetition_penalty);
            ban_repeated_ngrams(&mut logits, &beam.ids, params.no_repeat_ngram_size);
            for (token, log_prob) in top_tokens(&log_softmax(&logits), 2 * num_beams) {
                candidates.push((beam_index, token as i64, beam.score + log_prob));
            }
        }
        if candidates.is_empty() {
            break;
        }
        // Stable sort keeps lower beam and token indices first on ties.
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut next_beams = Vec::with_capacity(num_beams);
        for (rank, (beam_index, token, score)) in candidates.into_iter().enumerate() {
            let ids = &beams[beam_index].ids;
            if token == params.end_token_id {
                if rank < num_beams {
                    finished.push(Hypothesis {
                        ids: ids.clone(),
                        score,
                    });
                }
            } else {
                let mut ids = ids.clone();
                ids.push(token);
                next_beams.push(Hypothesis { ids, score });
            }
            if next_beams.len() == num_beams {
                break;
            }
        }
        beams = next_beams;

        if finished.len() >= num_beams || beams.is_empty() {
            break;
        }
    }

    if finished.is_empty() {
        finished = beams;
    }
    let best = finished
        .into_iter()
        .fold(None, |best: Option<Hypothesis>, hypothesis| match best {
            Some(current) if current.normalized() >= hypothesis.normalized() => Some(current),
            _ => Some(hypothesis),
        });
    Ok(best
        .map(|hypothesis| hypothesis.ids)
        .unwrap_or_else(|| vec![params.start_token_id]))
}

/// The `k` highest finite scores, best first; ties keep the lower index.
fn top_tokens(scores: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut ranked: Vec<(usize, f32)> = scores
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, score)| score.is_finite())
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked.truncate(k);
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repetition_penalty_shrinks_seen_tokens() {
        let mut logits = vec![2.0, -2.0, 4.0];
        apply_repetition_penalty(&mut logits, &[0, 1, 1], 2.0);
        assert_eq!(logits, vec![1.0, -4.0, 4.0]);
    }

    #[test]
    fn unit_penalty_is_a_no_op() {
        let mut logits = vec![2.0, -2.0];
        apply_repetition_penalty(&mut logits, &[0, 1], 1.0);
        assert_eq!(logits, vec![2.0, -2.0]);
    }

    #[test]
    fn bigram_repeat_is_banned() {
        // "a dog a" -> generating "dog" again would repeat the bigram (a, dog).
        let mut logits = vec![0.0; 4];
        ban_repeated_ngrams(&mut logits, &[1, 2, 1], 2);
        assert_eq!(logits[2], f32::NEG_INFINITY);
        assert_eq!(logits[1], 0.0);
        assert_eq!(logits[3], 0.0);
    }

    #[test]
    fn short_history_bans_nothing() {
        let mut logits = vec![0.0; 3];
        ban_repeated_ngrams(&mut logits, &[1], 2);
        ban_repeated_ngrams(&mut logits, &[1, 2], 0);
        assert!(logits.iter().all(|value| *value == 0.0));
    }

    const END: i64 = 0;
    const A: i64 = 1;
    const B: i64 = 2;
    const C: i64 = 3;
    const START: i64 = 4;

    fn params(num_beams: usize) -> SearchParams {
        SearchParams {
            num_beams,
            max_length: 10,
            start_token_id: START,
            end_token_id: END,
            repetition_penalty: 1.0,
            no_repeat_ngram_size: 0,
        }
    }

    /// Logits are log-probabilities over [END, A, B, C, START].
    fn scripted(ids: &[i64]) -> Result<Vec<f32>, ()> {
        let probs: [f32; 5] = match ids.last() {
            Some(&START) => [0.000_1, 0.5, 0.4, 0.099_9, 0.0],
            Some(&A) => [0.3, 0.0, 0.3, 0.4, 0.0],
            Some(&B) => [0.99, 0.003, 0.003, 0.004, 0.0],
            _ => [0.99, 0.003, 0.003, 0.004, 0.0],
        };
        Ok(probs
            .iter()
            .map(|p| if *p > 0.0 { p.ln() } else { f32::NEG_INFINITY })
            .collect())
    }

    fn sequence_log_prob(ids: &[i64]) -> f32 {
        let mut total = 0.0;
        let mut full = ids.to_vec();
        full.push(END);
        for step in 1..full.len() {
            let logits = scripted(&full[..step]).unwrap();
            total += log_softmax(&logits)[full[step] as usize];
        }
        total / ids.len() as f32
    }

    #[test]
    fn single_beam_is_greedy() {
        let ids = beam_search(&params(1), scripted).unwrap();
        assert_eq!(ids, vec![START, A, C]);
    }

    #[test]
    fn wider_beam_finds_better_sequence() {
        let greedy = beam_search(&params(1), scripted).unwrap();
        let beam = beam_search(&params(2), scripted).unwrap();
        assert_eq!(beam, vec![START, B]);
        assert!(sequence_log_prob(&beam) > sequence_log_prob(&greedy));
    }

    #[test]
    fn search_stops_at_max_length() {
        let mut search = params(3);
        search.max_length = 4;
        let never_ends = |_: &[i64]| -> Result<Vec<f32>, ()> { Ok(vec![f32::NEG_INFINITY, 1.0, 0.5, 0.0, 0.0]) };
        let ids = beam_search(&search, never_ends).unwrap();
        assert_eq!(ids.len(), 5);
        assert_eq!(ids[0], START);
    }

    #[test]
    fn per_hypothesis_ngram_ban_applies() {
        let mut search = params(1);
        search.max_length = 3;
        search.no_repeat_ngram_size = 1;
        // Always prefers A, but a unigram ban forces a new token each step.
        let prefers_a = |_: &[i64]| -> Result<Vec<f32>, ()> { Ok(vec![f32::NEG_INFINITY, 3.0, 2.0, 1.0, 0.0]) };
        let ids = beam_search(&search, prefers_a).unwrap();
        assert_eq!(ids, vec![START, A, B, C]);
    }

    #[test]
    fn decoder_errors_propagate() {
        let failing = |_: &[i64]| -> Result<Vec<f32>, &'static str> { Err("boom") };
        assert_eq!(beam_search(&params(2), failing), Err("boom"));
    }

    #[test]
    fn log_softmax_normalises() {
        let scores = log_softmax(&[1.0, 1.0, f32::NEG_INFINITY]);
        assert!((scores[0] - 0.5f32.ln()).abs() < 1e-6);
        assert_eq!(scores[2], f32::NEG_INFINITY);
        assert!(log_softmax(&[f32::NEG_INFINITY]).iter().all(|v| *v == f32::NEG_INFINITY));
    }
}

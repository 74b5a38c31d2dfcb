use anyhow::{Context, Result};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperSegment, WhisperState};

use crate::transcriber::{TimedUtterance, TimedWord};

pub(super) fn run_whisper_full(
    ctx: &WhisperContext,
    language: Option<&str>,
    threads: usize,
    samples: &[f32],
) -> Result<WhisperState> {
    let params = build_full_params(language, threads);

    let mut state = ctx
        .create_state()
        .context("failed to create whisper state")?;

    state
        .full(params, samples)
        .context("failed to run whisper full()")?;

    Ok(state)
}

fn build_full_params(language: Option<&str>, threads: usize) -> FullParams<'_, '_> {
    let mut params = FullParams::new(SamplingStrategy::BeamSearch {
        beam_size: 5,
        patience: 1.0,
    });

    params.set_n_threads(threads.max(1) as i32);
    params.set_translate(false);
    params.set_language(language.or(Some("auto")));
    params.set_no_context(true);
    params.set_single_segment(false);

    params.set_print_progress(false);
    params.set_print_special(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    params.set_token_timestamps(true);

    params
}

pub(super) fn to_utterance(segment: &WhisperSegment) -> Result<TimedUtterance> {
    let text = segment
        .to_str()
        .context("failed to get segment text")?
        .trim()
        .to_owned();

    let pieces = token_pieces(segment)?;
    let (start_seconds, end_seconds) = match token_span(&pieces) {
        Some(span) => span,
        None => (
            centiseconds_to_seconds(segment.start_timestamp()),
            centiseconds_to_seconds(segment.end_timestamp()),
        ),
    };

    Ok(TimedUtterance {
        start_seconds,
        end_seconds,
        text,
        words: words_from_tokens(&pieces),
    })
}

/// A text token with its timing in seconds.
#[derive(Debug, Clone, PartialEq)]
struct TokenPiece {
    text: String,
    start: f64,
    end: f64,
}

impl TokenPiece {
    fn timed(&self) -> bool {
        self.start > 0.0 || self.end > 0.0
    }
}

fn token_pieces(segment: &WhisperSegment) -> Result<Vec<TokenPiece>> {
    let token_count = segment.n_tokens();
    let token_count_usize = usize::try_from(token_count)
        .with_context(|| format!("segment reported negative token count: {token_count}"))?;
    let mut pieces = Vec::with_capacity(token_count_usize);

    for token_idx in 0..token_count {
        let token = segment
            .get_token(token_idx)
            .context("failed to get token from segment")?;
        let text = token
            .to_str()
            .with_context(|| format!("failed to get token text at index {token_idx}"))?;

        // Special/control tokens look like `[_BEG_]` or `[_TT_50]`.
        if text.starts_with("[_") && text.ends_with("_]") {
            continue;
        }

        let data = token.token_data();
        pieces.push(TokenPiece {
            text: text.to_owned(),
            start: centiseconds_to_seconds(data.t0),
            end: centiseconds_to_seconds(data.t1),
        });
    }
    Ok(pieces)
}

/// Earliest start and latest end over the timed tokens.
///
/// Segment-level timestamps often include leading and trailing silence, which makes cues
/// linger on screen. `None` when no token carries usable timing.
fn token_span(pieces: &[TokenPiece]) -> Option<(f64, f64)> {
    let mut min_start: Option<f64> = None;
    let mut max_end: Option<f64> = None;

    for piece in pieces.iter().filter(|p| p.timed()) {
        min_start = Some(min_start.map_or(piece.start, |v| v.min(piece.start)));
        max_end = Some(max_end.map_or(piece.end, |v| v.max(piece.end)));
    }

    match (min_start, max_end) {
        (Some(s), Some(e)) if e > s => Some((s, e)),
        _ => None,
    }
}

/// Join sub-word tokens into words. A token with leading whitespace starts a new word.
///
/// Empty when any word has no timing, since cues built from it would be wrong.
fn words_from_tokens(pieces: &[TokenPiece]) -> Vec<TimedWord> {
    let mut words: Vec<(TimedWord, bool)> = Vec::new();

    for piece in pieces {
        let trimmed = piece.text.trim();
        if trimmed.is_empty() {
            continue;
        }

        let starts_word = piece.text.starts_with(char::is_whitespace);
        match words.last_mut() {
            Some((word, timed)) if !starts_word => {
                word.text.push_str(trimmed);
                if piece.timed() {
                    if *timed {
                        word.start_seconds = word.start_seconds.min(piece.start);
                        word.end_seconds = word.end_seconds.max(piece.end);
                    } else {
                        word.start_seconds = piece.start;
                        word.end_seconds = piece.end;
                        *timed = true;
                    }
                }
            }
            _ => words.push((
                TimedWord {
                    start_seconds: piece.start,
                    end_seconds: piece.end,
                    text: trimmed.to_owned(),
                },
                piece.timed(),
            )),
        }
    }

    if words.iter().any(|(_, timed)| !timed) {
        return Vec::new();
    }
    words.into_iter().map(|(word, _)| word).collect()
}

/// whisper reports centiseconds, with -1 for unknown.
fn centiseconds_to_seconds(value: i64) -> f64 {
    if value < 0 { 0.0 } else { value as f64 / 100.0 }
}

//! Completion token detection over cumulative transcripts.
//!
//! Tokens are matched as exact, case-sensitive substrings anywhere in the
//! transcript, including inside code blocks or quoted text.

use crate::core::types::{CompletionStatus, Phase};

/// Token that signals the whole build is done.
pub const OVERALL_TOKEN: &str = "ANVIL_COMPLETE";

/// Completion token for a phase (`Complete` maps to [`OVERALL_TOKEN`]).
pub fn token_for(phase: Phase) -> &'static str {
    match phase {
        Phase::One => "ANVIL_PHASE_1_COMPLETE",
        Phase::Two => "ANVIL_PHASE_2_COMPLETE",
        Phase::Three => "ANVIL_PHASE_3_COMPLETE",
        Phase::Complete => OVERALL_TOKEN,
    }
}

/// True iff `token` occurs as a contiguous substring of `transcript`.
pub fn detect(transcript: &str, token: &str) -> bool {
    transcript.contains(token)
}

/// Classify the cumulative transcript against the watched phase.
///
/// The overall token wins over any phase token.
pub fn scan(transcript: &str, target: Phase) -> CompletionStatus {
    if detect(transcript, OVERALL_TOKEN) {
        return CompletionStatus::Complete;
    }
    match target.number() {
        Some(n) if detect(transcript, token_for(target)) => CompletionStatus::PhaseComplete(n),
        _ => CompletionStatus::Pending,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_match_wire_format() {
        assert_eq!(token_for(Phase::One), "ANVIL_PHASE_1_COMPLETE");
        assert_eq!(token_for(Phase::Two), "ANVIL_PHASE_2_COMPLETE");
        assert_eq!(token_for(Phase::Three), "ANVIL_PHASE_3_COMPLETE");
        assert_eq!(token_for(Phase::Complete), "ANVIL_COMPLETE");
    }

    #[test]
    fn detect_is_exact_substring() {
        let transcript = "line one\nwork done ANVIL_PHASE_1_COMPLETE\n";
        assert!(detect(transcript, "ANVIL_PHASE_1_COMPLETE"));
        assert!(!detect(transcript, "anvil_phase_1_complete"));
        assert!(!detect(transcript, "ANVIL_PHASE_2_COMPLETE"));

        let removed = transcript.replace("ANVIL_PHASE_1_COMPLETE", "");
        assert!(!detect(&removed, "ANVIL_PHASE_1_COMPLETE"));
    }

    #[test]
    fn detect_finds_token_in_earlier_chunk() {
        let chunks = ["ANVIL_PHASE_2_COMPLETE\n", "more output\n", "still going\n"];
        let cumulative: String = chunks.concat();
        assert!(detect(&cumulative, "ANVIL_PHASE_2_COMPLETE"));
    }

    #[test]
    fn phase_token_does_not_imply_overall() {
        assert!(!detect("ANVIL_PHASE_3_COMPLETE", OVERALL_TOKEN));
    }

    #[test]
    fn scan_reports_watched_phase_only() {
        let transcript = "ANVIL_PHASE_2_COMPLETE";
        assert_eq!(scan(transcript, Phase::Two), CompletionStatus::PhaseComplete(2));
        assert_eq!(scan(transcript, Phase::One), CompletionStatus::Pending);
        assert_eq!(scan(transcript, Phase::Complete), CompletionStatus::Pending);
    }

    #[test]
    fn scan_prefers_overall_token() {
        let transcript = "ANVIL_PHASE_1_COMPLETE then ANVIL_COMPLETE";
        assert_eq!(scan(transcript, Phase::One), CompletionStatus::Complete);
        assert_eq!(scan("", Phase::One), CompletionStatus::Pending);
    }
}

//! Race session selection.
//!
//! A result document carries one block per session of the event. Only the
//! race block is of interest, but upstream naming is inconsistent, so
//! selection falls through an ordered list of rules:
//!
//! 1. A label equal to `RACE`, then any label containing `RACE`
//! 2. A label containing `FEATURE` or `MAIN`, or equal to `R` or `RACE SESSION`
//! 3. The only block, when there is exactly one
//! 4. The block with the most participants
//!
//! Label comparison is case-insensitive. The last rule is a heuristic: a race
//! normally has the largest entry list of any session type.
//!
//! A block chosen by any rule must carry a non-empty participant list;
//! otherwise resolution fails rather than falling back to qualifying or
//! practice data.

use tracing::{debug, trace};

use crate::types::{RawResult, RawSession};

/// Which rule selected the race block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    ExactRace,
    ContainsRace,
    AlternateName,
    SingleSession,
    LargestField,
}

/// Why no race block could be selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    NoSessions,
    NoParticipants { label: String },
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolveError::NoSessions => f.write_str("no race session: result has no session blocks"),
            ResolveError::NoParticipants { label } => {
                write!(f, "no race session: block '{}' has no participant list", label)
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Select the race block from `raw`.
pub fn resolve_race_session(raw: &RawResult) -> Result<(&RawSession, Resolution), ResolveError> {
    let (index, resolution) = resolve_race_index(raw)?;
    Ok((&raw.session_results[index], resolution))
}

/// Like [`resolve_race_session`], returning the block's position in `session_results`.
pub fn resolve_race_index(raw: &RawResult) -> Result<(usize, Resolution), ResolveError> {
    let sessions = &raw.session_results;
    if sessions.is_empty() {
        return Err(ResolveError::NoSessions);
    }

    let (index, resolution) = select(sessions);
    let session = &sessions[index];
    trace!(
        result_id = raw.subsession_id,
        simsession_number = session.simsession_number,
        ?resolution,
        "Race session candidate selected"
    );

    if session.participant_count() == 0 {
        return Err(ResolveError::NoParticipants { label: describe(session) });
    }

    debug!(
        result_id = raw.subsession_id,
        session = %describe(session),
        participants = session.participant_count(),
        ?resolution,
        "Resolved race session"
    );
    Ok((index, resolution))
}

fn select(sessions: &[RawSession]) -> (usize, Resolution) {
    if let Some(index) = find_labelled(sessions, |label| label == "RACE") {
        return (index, Resolution::ExactRace);
    }
    if let Some(index) = find_labelled(sessions, |label| label.contains("RACE")) {
        return (index, Resolution::ContainsRace);
    }
    if let Some(index) = find_labelled(sessions, |label| {
        label.contains("FEATURE") || label.contains("MAIN") || label == "R" || label == "RACE SESSION"
    }) {
        return (index, Resolution::AlternateName);
    }
    if sessions.len() == 1 {
        return (0, Resolution::SingleSession);
    }

    // First block wins ties, keeping selection stable for equal fields
    let largest = sessions
        .iter()
        .enumerate()
        .rev()
        .max_by_key(|(_, session)| session.participant_count())
        .map_or(0, |(index, _)| index);
    (largest, Resolution::LargestField)
}

fn find_labelled<F>(sessions: &[RawSession], matches: F) -> Option<usize>
where
    F: Fn(&str) -> bool,
{
    sessions
        .iter()
        .position(|session| session.labels().any(|label| matches(&label.to_ascii_uppercase())))
}

fn describe(session: &RawSession) -> String {
    session.labels().next().map_or_else(
        || format!("session {}", session.simsession_number),
        str::to_string,
    )
}

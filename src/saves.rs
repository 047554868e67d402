//! Save conflict resolution
//!
//! Ranks the cloud and local save candidates for an item and recommends the
//! most recent one. The resolver is advisory: it never touches storage, the
//! caller submits whichever [`SaveChoice`] the user picks.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::sources::SaveListing;

/// Cloud candidates kept after ranking
pub const DEFAULT_MAX_CLOUD_SAVES: usize = 5;

const UNKNOWN_DATE: &str = "Unknown date";
const NEW_GAME_LABEL: &str = "Start new game";

/// A save snapshot stored remotely
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudSave {
    pub id: String,
    pub file_name: String,
    /// Timestamp as reported by the server
    pub updated_at: String,
}

/// The save snapshot on local storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSave {
    pub updated_at: String,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// A timestamp kept in both raw and parsed form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveTimestamp {
    pub raw: String,
    pub parsed: Option<DateTime<Utc>>,
}

impl SaveTimestamp {
    pub fn parse(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            parsed: parse_timestamp(raw),
        }
    }

    /// Display form; unparseable timestamps get a placeholder
    pub fn label(&self) -> String {
        match self.parsed {
            Some(ts) => ts.format("%Y-%m-%d %H:%M").to_string(),
            None => UNKNOWN_DATE.to_string(),
        }
    }
}

/// Accepts RFC 3339, `YYYY-MM-DD[ T]HH:MM:SS`, bare dates and unix seconds.
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// One option offered to the user when resuming an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveCandidate {
    Cloud {
        id: String,
        file_name: String,
        timestamp: SaveTimestamp,
    },
    Local {
        timestamp: SaveTimestamp,
    },
    /// Start without a save. Always ranked last.
    None,
}

/// Sort key: parsed timestamps above unparseable ones, `None` below everything
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum RankKey {
    NewGame,
    Undated,
    At(DateTime<Utc>),
}

impl SaveCandidate {
    fn rank_key(&self) -> RankKey {
        let timestamp = match self {
            SaveCandidate::Cloud { timestamp, .. } | SaveCandidate::Local { timestamp } => {
                timestamp
            }
            SaveCandidate::None => return RankKey::NewGame,
        };
        match timestamp.parsed {
            Some(ts) => RankKey::At(ts),
            None => RankKey::Undated,
        }
    }

    pub fn label(&self) -> String {
        match self {
            SaveCandidate::Cloud {
                file_name,
                timestamp,
                ..
            } => format!("Cloud: {} ({})", file_name, timestamp.label()),
            SaveCandidate::Local { timestamp } => format!("Local ({})", timestamp.label()),
            SaveCandidate::None => NEW_GAME_LABEL.to_string(),
        }
    }

    pub fn choice(&self) -> SaveChoice {
        match self {
            SaveCandidate::Cloud { id, .. } => SaveChoice::Cloud { id: id.clone() },
            SaveCandidate::Local { .. } => SaveChoice::Local,
            SaveCandidate::None => SaveChoice::NewGame,
        }
    }

    pub fn is_new_game(&self) -> bool {
        matches!(self, SaveCandidate::None)
    }
}

/// Descending by timestamp. `sort_by` is stable, so equal keys keep input order.
fn newest_first(a: &SaveCandidate, b: &SaveCandidate) -> Ordering {
    b.rank_key().cmp(&a.rank_key())
}

/// The identity the caller submits once the user has picked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SaveChoice {
    Cloud { id: String },
    Local,
    NewGame,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedSave {
    pub candidate: SaveCandidate,
    pub recommended: bool,
}

/// Ranked options, newest first, always ending with the new-game option
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankedOptions {
    pub options: Vec<RankedSave>,
}

impl RankedOptions {
    pub fn recommended(&self) -> Option<&RankedSave> {
        self.options.iter().find(|option| option.recommended)
    }

    /// Recommended choice, or a new game when nothing is recommended
    pub fn default_choice(&self) -> SaveChoice {
        self.recommended()
            .map(|option| option.candidate.choice())
            .unwrap_or(SaveChoice::NewGame)
    }

    pub fn choice_at(&self, index: usize) -> Option<SaveChoice> {
        self.options.get(index).map(|option| option.candidate.choice())
    }

    /// More than one real save to pick from
    pub fn has_conflict(&self) -> bool {
        self.options
            .iter()
            .filter(|option| !option.candidate.is_new_game())
            .count()
            > 1
    }

    pub fn len(&self) -> usize {
        self.options.len()
    }

    pub fn is_empty(&self) -> bool {
        self.options.is_empty()
    }
}

/// Ranks save candidates for a resume decision
#[derive(Debug, Clone, Copy)]
pub struct SaveResolver {
    max_cloud: usize,
}

impl Default for SaveResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CLOUD_SAVES)
    }
}

impl SaveResolver {
    pub fn new(max_cloud: usize) -> Self {
        Self { max_cloud }
    }

    pub fn resolve(&self, cloud: &[CloudSave], local: Option<&LocalSave>) -> RankedOptions {
        let mut clouds: Vec<SaveCandidate> = cloud
            .iter()
            .map(|save| SaveCandidate::Cloud {
                id: save.id.clone(),
                file_name: save.file_name.clone(),
                timestamp: SaveTimestamp::parse(&save.updated_at),
            })
            .collect();
        // Rank the full set before keeping the newest few
        clouds.sort_by(newest_first);
        clouds.truncate(self.max_cloud);

        let mut candidates = clouds;
        if let Some(local) = local {
            candidates.push(SaveCandidate::Local {
                timestamp: SaveTimestamp::parse(&local.updated_at),
            });
        }
        candidates.push(SaveCandidate::None);
        candidates.sort_by(newest_first);

        let options = candidates
            .into_iter()
            .enumerate()
            .map(|(index, candidate)| RankedSave {
                recommended: index == 0 && !candidate.is_new_game(),
                candidate,
            })
            .collect();

        RankedOptions { options }
    }

    pub fn resolve_listing(&self, listing: &SaveListing) -> RankedOptions {
        self.resolve(&listing.cloud, listing.local.as_ref())
    }
}

/// Reject listings the resolver cannot rank meaningfully.
///
/// A cloud save without an id, or two saves sharing one, would make the
/// caller's submitted choice ambiguous.
pub fn validate_listing(listing: &SaveListing) -> Result<()> {
    let mut seen = HashSet::new();
    for save in &listing.cloud {
        if save.id.trim().is_empty() {
            return Err(EngineError::Invariant(format!(
                "cloud save '{}' has no id",
                save.file_name
            )));
        }
        if !seen.insert(save.id.as_str()) {
            return Err(EngineError::Invariant(format!(
                "duplicate cloud save id '{}'",
                save.id
            )));
        }
    }
    Ok(())
}

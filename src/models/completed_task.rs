use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Team {
    #[serde(rename = "PLA")]
    Playable,
    Art,
    Video,
    Concept,
}

impl Team {
    pub const ALL: [Team; 4] = [Team::Concept, Team::Playable, Team::Art, Team::Video];

    /// Label used by the tracker in custom-field names and stored rows.
    pub fn label(self) -> &'static str {
        match self {
            Team::Playable => "PLA",
            Team::Art => "Art",
            Team::Video => "Video",
            Team::Concept => "Concept",
        }
    }

    /// Settings / environment key for the team's own tracker space.
    pub fn key(self) -> &'static str {
        match self {
            Team::Playable => "playable",
            Team::Art => "art",
            Team::Video => "video",
            Team::Concept => "concept",
        }
    }

    /// Owning team of a canonical task-type.
    pub fn for_task_type(task_type: &str) -> Option<Team> {
        match task_type {
            "playable" => Some(Team::Playable),
            "video" => Some(Team::Video),
            "concept" => Some(Team::Concept),
            t if t.starts_with("art_") => Some(Team::Art),
            _ => None,
        }
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Team {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pla" | "playable" => Ok(Team::Playable),
            "art" => Ok(Team::Art),
            "video" | "vid" => Ok(Team::Video),
            "concept" => Ok(Team::Concept),
            other => Err(format!("Unknown team: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedTask {
    pub task_id: String,
    pub task_name: String,
    pub assignee_id: String, // email, "" when none resolvable
    pub team: Team,
    pub task_type: String,
    pub level: i64,
    pub tool: Vec<u32>,
    pub project: String,
    pub done_date: DateTime<Utc>, // representative bucket, not the raw completion instant
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_labels_round_trip_through_parse() {
        for team in Team::ALL {
            assert_eq!(team.label().parse::<Team>(), Ok(team));
            assert_eq!(team.key().parse::<Team>(), Ok(team));
        }
    }

    #[test]
    fn task_types_map_to_owning_team() {
        assert_eq!(Team::for_task_type("art_icon"), Some(Team::Art));
        assert_eq!(Team::for_task_type("art_asset"), Some(Team::Art));
        assert_eq!(Team::for_task_type("playable"), Some(Team::Playable));
        assert_eq!(Team::for_task_type("video"), Some(Team::Video));
        assert_eq!(Team::for_task_type("sound"), None);
    }

    #[test]
    fn playable_team_serializes_with_source_label() {
        assert_eq!(serde_json::to_string(&Team::Playable).unwrap(), "\"PLA\"");
    }
}

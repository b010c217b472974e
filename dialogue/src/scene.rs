//! Scene descriptions for the dialogue prompts.
//!
//! The protocol treats a scene as an opaque string. [`ClockedSceneProvider`]
//! renders one from configured persona situations and a simulated clock.

use chrono::{Duration, NaiveDateTime};

use crate::config::{PersonaConfig, SceneConfig};

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Source of scene context and simulated time.
pub trait SceneProvider: Send {
    /// Current simulated time.
    fn now(&self) -> NaiveDateTime;

    /// Scene for a two-party conversation.
    fn pair_scene(&self, first: &str, second: &str) -> String;

    /// Scene for a group session.
    fn group_scene(&self, participants: &[String]) -> String;

    /// Short place name used to label conversations.
    fn place(&self, participants: &[String]) -> String;

    /// Move the clock forward.
    fn advance(&mut self, minutes: u32);
}

/// Scene provider backed by static persona situations and a clock.
#[derive(Debug, Clone)]
pub struct ClockedSceneProvider {
    personas: Vec<PersonaConfig>,
    gathering_place: String,
    now: NaiveDateTime,
}

impl ClockedSceneProvider {
    pub fn new(personas: Vec<PersonaConfig>, scene: &SceneConfig) -> Self {
        Self {
            personas,
            gathering_place: scene.gathering_place.clone(),
            now: scene.start_time,
        }
    }

    fn persona(&self, name: &str) -> Option<&PersonaConfig> {
        self.personas.iter().find(|p| p.name == name)
    }

    fn location_of(&self, name: &str) -> &str {
        self.persona(name)
            .map(|p| p.location.as_str())
            .filter(|l| !l.is_empty())
            .unwrap_or(self.gathering_place.as_str())
    }

    fn activity_line(&self, name: &str) -> String {
        match self.persona(name).map(|p| p.activity.as_str()) {
            Some(activity) if !activity.is_empty() => format!("{} is {}", name, activity),
            _ => format!("{} is idle", name),
        }
    }
}

impl SceneProvider for ClockedSceneProvider {
    fn now(&self) -> NaiveDateTime {
        self.now
    }

    fn pair_scene(&self, first: &str, second: &str) -> String {
        format!(
            "Location: {}\nTime: {}\nParticipants: {}, {}\n{}\n{}",
            self.location_of(first),
            self.now.format(TIME_FORMAT),
            first,
            second,
            self.activity_line(first),
            self.activity_line(second),
        )
    }

    fn group_scene(&self, participants: &[String]) -> String {
        let mut lines = vec![
            format!("Location: {}", self.gathering_place),
            format!("Time: {}", self.now.format(TIME_FORMAT)),
            format!("Participants: {}", participants.join(", ")),
            "Everyone has gathered together.".to_string(),
        ];
        lines.extend(participants.iter().map(|name| self.activity_line(name)));
        lines.join("\n")
    }

    fn place(&self, participants: &[String]) -> String {
        match participants {
            [only] => self.location_of(only).to_string(),
            [first, _] => self.location_of(first).to_string(),
            _ => self.gathering_place.clone(),
        }
    }

    fn advance(&mut self, minutes: u32) {
        self.now += Duration::minutes(minutes as i64);
    }
}

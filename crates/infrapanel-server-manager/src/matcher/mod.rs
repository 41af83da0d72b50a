//! Console line detectors, one strategy per software family.

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, LazyLock};

use regex::Regex;

use crate::model::SoftwareType;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerEvent {
    Joined(String),
    Left(String),
}

/// Recognizes the "fully started" marker and player join/leave lines.
///
/// Matching is best-effort text scanning; a missed line only means a stale
/// player list or a server that stays `Starting` until the next marker.
pub trait LogMatcher: Send + Sync + Debug {
    fn is_ready(&self, line: &str) -> bool;

    fn player_event(&self, line: &str) -> Option<PlayerEvent>;
}

static VANILLA_READY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"Done \(\d+(?:[.,]\d+)?s\)! For help, type "help""#)
        .expect("valid ready regex")
});
static VANILLA_JOINED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|:\s)([^\s\[\]:<>]+) joined the game").expect("valid join regex")
});
static VANILLA_LEFT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|:\s)([^\s\[\]:<>]+) left the game").expect("valid leave regex")
});

static VELOCITY_READY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Done \(\d+(?:[.,]\d+)?s\)!").expect("valid ready regex"));
static VELOCITY_CONNECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[connected player\] (\S+) \([^)]*\) has connected").expect("valid join regex")
});
static VELOCITY_DISCONNECTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[connected player\] (\S+) \([^)]*\) has disconnected")
        .expect("valid leave regex")
});

fn capture(regex: &Regex, line: &str) -> Option<String> {
    regex
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Paper and the modded loaders, which all log through the vanilla server.
#[derive(Debug, Default, Clone, Copy)]
pub struct VanillaMatcher;

impl LogMatcher for VanillaMatcher {
    fn is_ready(&self, line: &str) -> bool {
        VANILLA_READY.is_match(line)
    }

    fn player_event(&self, line: &str) -> Option<PlayerEvent> {
        if let Some(name) = capture(&VANILLA_JOINED, line) {
            return Some(PlayerEvent::Joined(name));
        }
        capture(&VANILLA_LEFT, line).map(PlayerEvent::Left)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct VelocityMatcher;

impl LogMatcher for VelocityMatcher {
    fn is_ready(&self, line: &str) -> bool {
        VELOCITY_READY.is_match(line)
    }

    fn player_event(&self, line: &str) -> Option<PlayerEvent> {
        if let Some(name) = capture(&VELOCITY_CONNECTED, line) {
            return Some(PlayerEvent::Joined(name));
        }
        capture(&VELOCITY_DISCONNECTED, line).map(PlayerEvent::Left)
    }
}

#[derive(Debug, Clone)]
pub struct MatcherRegistry {
    matchers: HashMap<SoftwareType, Arc<dyn LogMatcher>>,
    fallback: Arc<dyn LogMatcher>,
}

impl Default for MatcherRegistry {
    fn default() -> Self {
        let vanilla: Arc<dyn LogMatcher> = Arc::new(VanillaMatcher);
        let mut matchers = HashMap::new();
        for software in [
            SoftwareType::Paper,
            SoftwareType::Forge,
            SoftwareType::Fabric,
            SoftwareType::NeoForge,
        ] {
            matchers.insert(software, vanilla.clone());
        }
        matchers.insert(
            SoftwareType::Velocity,
            Arc::new(VelocityMatcher) as Arc<dyn LogMatcher>,
        );

        Self {
            matchers,
            fallback: vanilla,
        }
    }
}

impl MatcherRegistry {
    pub fn register(&mut self, software: SoftwareType, matcher: Arc<dyn LogMatcher>) {
        self.matchers.insert(software, matcher);
    }

    pub fn get(&self, software: SoftwareType) -> Arc<dyn LogMatcher> {
        self.matchers
            .get(&software)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paper_ready_marker() {
        let matcher = VanillaMatcher;
        assert!(matcher.is_ready(r#"[14:02:11 INFO]: Done (4.512s)! For help, type "help""#));
        assert!(matcher.is_ready(
            r#"[14:02:11] [Server thread/INFO] [minecraft/DedicatedServer]: Done (31,07s)! For help, type "help""#
        ));
        assert!(!matcher.is_ready("[14:02:11 INFO]: Done (4.512s)!"));
        assert!(!matcher.is_ready("[14:02:01 INFO]: Preparing level \"world\""));
    }

    #[test]
    fn test_velocity_ready_marker() {
        assert!(VelocityMatcher.is_ready("[14:02:11 INFO]: Done (1.23s)!"));
        assert!(!VelocityMatcher.is_ready("[14:02:11 INFO]: Booting up Velocity 3.3.0"));
    }

    #[test]
    fn test_vanilla_player_events() {
        let matcher = VanillaMatcher;
        assert_eq!(
            matcher.player_event("[14:05:00 INFO]: Steve joined the game"),
            Some(PlayerEvent::Joined("Steve".to_string()))
        );
        assert_eq!(
            matcher.player_event(
                "[14:05:00] [Server thread/INFO] [minecraft/MinecraftServer]: Alex_99 left the game"
            ),
            Some(PlayerEvent::Left("Alex_99".to_string()))
        );
        assert_eq!(
            matcher.player_event("Notch joined the game"),
            Some(PlayerEvent::Joined("Notch".to_string()))
        );
    }

    #[test]
    fn test_chat_cannot_spoof_player_events() {
        let matcher = VanillaMatcher;
        assert_eq!(
            matcher.player_event("[14:05:00 INFO]: <Steve> Herobrine joined the game"),
            None
        );
        assert_eq!(matcher.player_event("[14:05:00 INFO]: Steve lost connection"), None);
    }

    #[test]
    fn test_velocity_player_events() {
        assert_eq!(
            VelocityMatcher.player_event(
                "[14:05:00 INFO]: [connected player] Steve (/10.0.0.4:51234) has connected"
            ),
            Some(PlayerEvent::Joined("Steve".to_string()))
        );
        assert_eq!(
            VelocityMatcher.player_event(
                "[14:09:00 INFO]: [connected player] Steve (/10.0.0.4:51234) has disconnected"
            ),
            Some(PlayerEvent::Left("Steve".to_string()))
        );
        assert_eq!(
            VelocityMatcher.player_event("[14:05:00 INFO]: Steve joined the game"),
            None
        );
    }

    #[derive(Debug)]
    struct AlwaysReady;

    impl LogMatcher for AlwaysReady {
        fn is_ready(&self, _line: &str) -> bool {
            true
        }

        fn player_event(&self, _line: &str) -> Option<PlayerEvent> {
            None
        }
    }

    #[test]
    fn test_registry_dispatches_per_family() {
        let mut registry = MatcherRegistry::default();
        let line = "[14:02:11 INFO]: Done (1.23s)!";
        assert!(registry.get(SoftwareType::Velocity).is_ready(line));
        assert!(!registry.get(SoftwareType::Paper).is_ready(line));

        registry.register(SoftwareType::Fabric, Arc::new(AlwaysReady));
        assert!(registry.get(SoftwareType::Fabric).is_ready("anything"));
        assert!(!registry.get(SoftwareType::Forge).is_ready("anything"));
    }
}

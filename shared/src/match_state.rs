//! Match state machine: `Menu -> Connecting -> Running -> Ending -> Menu`.
//!
//! Every process keeps a coordinator so scores can be displayed anywhere,
//! but only the authoritative one may start or end a match. Observers
//! follow along through [`MatchCoordinator::apply_fact`].

use crate::protocol::Fact;
use log::{debug, info};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchPhase {
    Menu,
    Connecting,
    Running,
    Ending,
}

/// Result of a finished match. An empty winner means nobody reached the
/// threshold (attrition or an explicit end).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchEnd {
    pub winner: String,
    pub kills: u32,
}

impl MatchEnd {
    pub fn to_fact(&self) -> Fact {
        Fact::MatchEnded {
            winner: self.winner.clone(),
            kills: self.kills,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchCoordinator {
    authoritative: bool,
    phase: MatchPhase,
    scores: HashMap<String, u32>,
    kills_to_win: u32,
    min_players: usize,
    /// Set on the first Running -> Ending transition of a match, cleared
    /// only when the next match starts.
    ending_latch: bool,
    last_result: Option<MatchEnd>,
}

impl MatchCoordinator {
    pub fn new(authoritative: bool, kills_to_win: u32, min_players: usize) -> Self {
        Self {
            authoritative,
            phase: MatchPhase::Menu,
            scores: HashMap::new(),
            kills_to_win,
            min_players,
            ending_latch: false,
            last_result: None,
        }
    }

    pub fn phase(&self) -> MatchPhase {
        self.phase
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    pub fn is_running(&self) -> bool {
        self.phase == MatchPhase::Running
    }

    pub fn kills_to_win(&self) -> u32 {
        self.kills_to_win
    }

    pub fn score(&self, name: &str) -> Option<u32> {
        self.scores.get(name).copied()
    }

    pub fn scores(&self) -> &HashMap<String, u32> {
        &self.scores
    }

    pub fn last_result(&self) -> Option<&MatchEnd> {
        self.last_result.as_ref()
    }

    /// Highest score, ties broken by name for a stable display.
    pub fn leader(&self) -> Option<(&str, u32)> {
        self.scores
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)))
            .map(|(name, kills)| (name.as_str(), *kills))
    }

    pub fn session_opened(&mut self) {
        if self.phase == MatchPhase::Menu {
            self.phase = MatchPhase::Connecting;
        }
    }

    /// Starts a match if enough players are present. The caller performs the
    /// side effects (vitals reset, combat on, score and start broadcasts).
    pub fn try_start(&mut self, player_count: usize) -> bool {
        if !self.authoritative {
            return false;
        }
        if !matches!(self.phase, MatchPhase::Menu | MatchPhase::Connecting) {
            return false;
        }
        if player_count < self.min_players {
            debug!(
                "Waiting for players: {}/{}",
                player_count, self.min_players
            );
            return false;
        }

        self.phase = MatchPhase::Running;
        self.ending_latch = false;
        self.last_result = None;
        for kills in self.scores.values_mut() {
            *kills = 0;
        }
        info!("Match started with {} players", player_count);
        true
    }

    /// Records a score and ends the match if it reaches the threshold.
    pub fn record_score(&mut self, name: &str, kills: u32) -> Option<MatchEnd> {
        self.scores.insert(name.to_string(), kills);
        if self.authoritative && self.phase == MatchPhase::Running && kills >= self.kills_to_win {
            return self.finish(name.to_string(), kills);
        }
        None
    }

    pub fn forget_player(&mut self, name: &str) {
        self.scores.remove(name);
    }

    /// Ends the match by attrition when too few players remain.
    pub fn on_player_count(&mut self, player_count: usize) -> Option<MatchEnd> {
        if self.authoritative && self.phase == MatchPhase::Running && player_count < self.min_players
        {
            return self.finish(String::new(), 0);
        }
        None
    }

    pub fn request_end(&mut self) -> Option<MatchEnd> {
        if !self.authoritative {
            return None;
        }
        self.finish(String::new(), 0)
    }

    fn finish(&mut self, winner: String, kills: u32) -> Option<MatchEnd> {
        if self.ending_latch || self.phase != MatchPhase::Running {
            return None;
        }
        self.ending_latch = true;
        self.phase = MatchPhase::Ending;
        let result = MatchEnd { winner, kills };
        info!(
            "Match ended: winner '{}' with {} kills",
            result.winner, result.kills
        );
        self.last_result = Some(result.clone());
        Some(result)
    }

    /// Leave or restart. Scores are kept until the next match resets them.
    pub fn return_to_menu(&mut self) -> bool {
        if self.phase == MatchPhase::Menu {
            return false;
        }
        self.phase = MatchPhase::Menu;
        true
    }

    /// Mirrors an authoritative fact. The authority ignores match
    /// transitions here since it produced them itself.
    pub fn apply_fact(&mut self, fact: &Fact) {
        match fact {
            Fact::ScoreUpdated { name, kills } => {
                self.scores.insert(name.clone(), *kills);
            }
            Fact::MatchStarted if !self.authoritative => {
                self.phase = MatchPhase::Running;
                self.ending_latch = false;
                self.last_result = None;
            }
            Fact::MatchEnded { winner, kills } if !self.authoritative => {
                self.phase = MatchPhase::Ending;
                self.ending_latch = true;
                self.last_result = Some(MatchEnd {
                    winner: winner.clone(),
                    kills: *kills,
                });
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> MatchCoordinator {
        let mut coordinator = MatchCoordinator::new(true, 10, 2);
        coordinator.session_opened();
        assert!(coordinator.try_start(2));
        coordinator
    }

    #[test]
    fn test_needs_min_players() {
        let mut coordinator = MatchCoordinator::new(true, 10, 2);
        coordinator.session_opened();
        assert_eq!(coordinator.phase(), MatchPhase::Connecting);
        assert!(!coordinator.try_start(1));
        assert!(coordinator.try_start(2));
        assert_eq!(coordinator.phase(), MatchPhase::Running);
        assert!(!coordinator.try_start(3));
    }

    #[test]
    fn test_observer_cannot_start_or_end() {
        let mut coordinator = MatchCoordinator::new(false, 10, 2);
        assert!(!coordinator.try_start(4));
        coordinator.apply_fact(&Fact::MatchStarted);
        assert!(coordinator.is_running());
        assert_eq!(coordinator.record_score("a", 10), None);
        assert_eq!(coordinator.request_end(), None);
        assert_eq!(coordinator.on_player_count(0), None);
        assert!(coordinator.is_running());
    }

    #[test]
    fn test_win_threshold_ends_once() {
        let mut coordinator = running();
        assert_eq!(coordinator.record_score("a", 9), None);
        let end = coordinator.record_score("a", 10);
        assert_eq!(
            end,
            Some(MatchEnd {
                winner: "a".to_string(),
                kills: 10
            })
        );
        assert_eq!(coordinator.phase(), MatchPhase::Ending);

        // Simultaneous triggers are no-ops.
        assert_eq!(coordinator.record_score("b", 10), None);
        assert_eq!(coordinator.on_player_count(1), None);
        assert_eq!(coordinator.request_end(), None);
        assert_eq!(coordinator.last_result().map(|r| r.winner.as_str()), Some("a"));
    }

    #[test]
    fn test_many_triggers_single_end() {
        let mut coordinator = running();
        let ends = (0..50)
            .filter_map(|i| coordinator.record_score(&format!("p{}", i % 3), 10 + i))
            .count();
        assert_eq!(ends, 1);
    }

    #[test]
    fn test_attrition_empty_winner() {
        let mut coordinator = running();
        assert_eq!(coordinator.on_player_count(2), None);
        let end = coordinator.on_player_count(1).unwrap();
        assert_eq!(end.winner, "");
        assert_eq!(end.kills, 0);
    }

    #[test]
    fn test_restart_cycle_clears_latch() {
        let mut coordinator = running();
        coordinator.record_score("a", 10);
        assert!(!coordinator.try_start(2));
        assert!(coordinator.return_to_menu());
        assert!(coordinator.try_start(2));
        assert_eq!(coordinator.score("a"), Some(0));
        assert!(coordinator.record_score("a", 10).is_some());
    }

    #[test]
    fn test_observer_mirror() {
        let mut coordinator = MatchCoordinator::new(false, 10, 2);
        coordinator.apply_fact(&Fact::ScoreUpdated {
            name: "bob".to_string(),
            kills: 4,
        });
        coordinator.apply_fact(&Fact::MatchEnded {
            winner: "bob".to_string(),
            kills: 10,
        });
        assert_eq!(coordinator.phase(), MatchPhase::Ending);
        assert_eq!(coordinator.score("bob"), Some(4));
        assert_eq!(coordinator.leader(), Some(("bob", 4)));
    }

    #[test]
    fn test_authority_ignores_mirrored_transitions() {
        let mut coordinator = MatchCoordinator::new(true, 10, 2);
        coordinator.apply_fact(&Fact::MatchStarted);
        assert_eq!(coordinator.phase(), MatchPhase::Menu);
    }
}

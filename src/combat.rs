//! Bounded fight loop against one committed target

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::arbiter::ArbiterContext;
use crate::config::{secs, CombatConfig, CoreConfig};
use crate::detection::SkillBar;
use crate::error::{CoreError, Result};
use crate::input::{DirectionKey, Key};
use crate::perception::Observation;
use crate::types::{union_centroid, Detection, Label, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngageOutcome {
    Alive,
    Dead,
}

/// Where the committed target is now. Several boxes of `label` are
/// aggregated the same way the target was picked, so the union centroid is
/// tried first; otherwise the nearest single box. Either must lie within
/// `proximity` of `last` on both axes.
pub fn find_same_target(detections: &[Detection], label: Label, last: Point, proximity: i32) -> Option<Point> {
    let near = |c: &Point| (c.x - last.x).abs() < proximity && (c.y - last.y).abs() < proximity;
    let same_label = || detections.iter().filter(move |d| d.label == label);
    let aggregate = union_centroid(same_label().map(|d| &d.bbox))?;
    if near(&aggregate) {
        return Some(aggregate);
    }
    same_label()
        .map(Detection::centroid)
        .filter(near)
        .min_by_key(|c| (c.x - last.x).abs() + (c.y - last.y).abs())
}

/// Key that turns the agent towards `target` horizontally, if it is not
/// straight above or below.
pub fn facing_key(agent: Point, target: Point) -> Option<DirectionKey> {
    match target.x.cmp(&agent.x) {
        std::cmp::Ordering::Greater => Some(DirectionKey::Right),
        std::cmp::Ordering::Less => Some(DirectionKey::Left),
        std::cmp::Ordering::Equal => None,
    }
}

pub struct CombatRoutine {
    config: CombatConfig,
    skill_bar: SkillBar,
    rng: StdRng,
}

impl CombatRoutine {
    pub fn new(config: &CoreConfig) -> Self {
        let rng = match config.combat.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config: config.combat.clone(),
            skill_bar: SkillBar::from_config(&config.skill_bar),
            rng,
        }
    }

    fn uniform(&mut self, range: [f64; 2]) -> f64 {
        let [lo, hi] = range;
        if hi > lo {
            self.rng.gen_range(lo..=hi)
        } else {
            lo
        }
    }

    /// Up to N ready abilities in random order, or one random ability when
    /// none reads as ready.
    pub fn pick_abilities(&mut self, ready: &[char]) -> Vec<char> {
        let (lo, hi) = self.config.abilities_per_round;
        let count = self.rng.gen_range(lo..=hi.max(lo)) as usize;
        if ready.is_empty() {
            let all: Vec<char> = self.skill_bar.keys().collect();
            return all.choose(&mut self.rng).copied().into_iter().collect();
        }
        ready
            .choose_multiple(&mut self.rng, count.min(ready.len()))
            .copied()
            .collect()
    }

    /// Fights until the target disappears or the round cap is hit. `agent`
    /// is the agent's current position, if known.
    pub fn engage(
        &mut self,
        ctx: &mut ArbiterContext,
        observation: &Observation,
        label: Label,
        target: Point,
        agent: Option<Point>,
    ) -> Result<EngageOutcome> {
        let mut target = target;
        let mut agent = agent;
        let mut ready = self.skill_bar.ready_skills(&observation.frame);

        for round in 1..=self.config.round_cap {
            if let Some(key) = agent.and_then(|a| facing_key(a, target)) {
                ctx.planner.face(key)?;
            }

            for skill in self.pick_abilities(&ready) {
                let press = secs(self.uniform(self.config.ability_press_secs));
                ctx.planner.tap(Key::Skill(skill), press)?;
                let settle = secs(self.uniform(self.config.ability_settle_secs));
                ctx.wait(settle)?;
            }
            let press = secs(self.uniform(self.config.attack_press_secs));
            ctx.planner.tap(Key::Attack, press)?;
            let settle = secs(self.uniform(self.config.attack_settle_secs));
            ctx.wait(settle)?;

            let seen = match ctx.perception.observe() {
                Ok(obs) => {
                    ready = self.skill_bar.ready_skills(&obs.frame);
                    agent = obs.agent_position().or(agent);
                    find_same_target(&obs.detections, label, target, self.config.proximity)
                }
                Err(CoreError::PerceptionMiss(msg)) => {
                    debug!(%msg, "re-observation missed, assuming target gone");
                    None
                }
                Err(e) => return Err(e),
            };
            match seen {
                None => {
                    info!(?label, round, "target defeated");
                    return Ok(EngageOutcome::Dead);
                }
                Some(centroid) => {
                    debug!(?label, round, ?centroid, "target still present");
                    target = centroid;
                }
            }
            if round < self.config.round_cap {
                ctx.wait(secs(self.config.round_rest_secs))?;
            }
        }
        Ok(EngageOutcome::Alive)
    }
}

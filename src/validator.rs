use log::debug;
use serde_derive::Serialize;

use crate::access::AccessPair;
use crate::config::TurnThresholds;
use crate::detection::ObjectClass;
use crate::error::Error;
use crate::movement::{Cardinal, CodeFamily, MovementCode, RilsaLabel, TurnKind};
use crate::trajectory::Trajectory;

/// What a rule may look at besides the label itself.
#[derive(Debug, Clone, Copy)]
pub struct Context {
    pub class: ObjectClass,
    pub origin: Cardinal,
    pub destination: Cardinal,
    pub turn_angle_deg: f32,
    pub turns: TurnThresholds,
}

struct Rule {
    name: &'static str,
    violated: fn(&RilsaLabel, &Context) -> bool,
    /// `None` when the violation has no deterministic fix.
    correct: fn(&RilsaLabel, &Context) -> Option<RilsaLabel>,
}

fn no_fix(_: &RilsaLabel, _: &Context) -> Option<RilsaLabel> {
    None
}

/// Whether a measured turn angle is compatible with a turn kind.
pub fn angle_fits(kind: TurnKind, angle: f32, turns: &TurnThresholds) -> bool {
    let tol = turns.tolerance_deg;

    match kind {
        TurnKind::Direct => angle.abs() <= turns.turn_deg + tol,
        TurnKind::Left => angle >= turns.turn_deg - tol,
        TurnKind::Right => angle <= -(turns.turn_deg - tol),
        TurnKind::UTurn => angle.abs() >= turns.uturn_deg - tol,
        TurnKind::Pedestrian => true,
    }
}

fn is_walk(label: &RilsaLabel) -> bool {
    label.family == CodeFamily::Pedestrian
}

const RULES: &[Rule] = &[
    Rule {
        name: "class-consistency",
        violated: |label, ctx| ctx.class.is_pedestrian() != is_walk(label),
        correct: |_, ctx| {
            if ctx.class.is_pedestrian() {
                Some(RilsaLabel::pedestrian(Some(ctx.origin.index())))
            } else {
                None
            }
        },
    },
    Rule {
        name: "code-range",
        violated: |label, _| matches!(label.family, CodeFamily::Numbered(n) if !(1..=10).contains(&n)),
        correct: no_fix,
    },
    Rule {
        name: "index-presence",
        violated: |label, _| match label.index {
            Some(i) => !label.needs_index() || !(1..=4).contains(&i),
            None => label.needs_index(),
        },
        correct: |label, ctx| {
            let index = if label.needs_index() {
                Some(ctx.origin.index())
            } else {
                None
            };

            Some(RilsaLabel { index, ..*label })
        },
    },
    Rule {
        name: "origin-consistency",
        violated: |label, ctx| label.origin() != Some(ctx.origin),
        correct: no_fix,
    },
    Rule {
        name: "destination-consistency",
        violated: |label, ctx| {
            !is_walk(label) && label.kind() != Some(TurnKind::between(ctx.origin, ctx.destination))
        },
        correct: |_, ctx| {
            let kind = TurnKind::between(ctx.origin, ctx.destination);

            if angle_fits(kind, ctx.turn_angle_deg, &ctx.turns) {
                Some(MovementCode::new(kind, ctx.origin).label())
            } else {
                None
            }
        },
    },
    Rule {
        name: "geometric-consistency",
        violated: |label, ctx| match label.kind() {
            Some(kind) => !angle_fits(kind, ctx.turn_angle_deg, &ctx.turns),
            None => true,
        },
        correct: no_fix,
    },
];

/// Rule names in evaluation order.
pub fn rule_names() -> impl Iterator<Item = &'static str> {
    RULES.iter().map(|r| r.name)
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub enum Verdict {
    Ok(MovementCode),
    Corrected {
        #[serde(serialize_with = "crate::validator::serialize_label")]
        from: RilsaLabel,
        code: MovementCode,
        rules: Vec<&'static str>,
    },
    Flagged {
        rule: &'static str,
    },
}

pub(crate) fn serialize_label<S: serde::Serializer>(
    label: &RilsaLabel,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(label)
}

impl Verdict {
    /// Code that may be counted, `None` when flagged.
    pub fn code(&self) -> Option<MovementCode> {
        match self {
            Verdict::Ok(code) | Verdict::Corrected { code, .. } => Some(*code),
            Verdict::Flagged { .. } => None,
        }
    }

    pub fn into_result(self, track_id: u32) -> Result<MovementCode, Error> {
        match self {
            Verdict::Ok(code) | Verdict::Corrected { code, .. } => Ok(code),
            Verdict::Flagged { rule } => Err(Error::ValidationFlag { track_id, rule }),
        }
    }
}

/// Runs the fixed rule list over a movement label.
///
/// Rules are evaluated in order against the label as corrected so far; the
/// first violation without a deterministic fix flags the trajectory.
#[derive(Debug, Clone)]
pub struct Validator {
    turns: TurnThresholds,
}

impl Validator {
    pub fn new(turns: TurnThresholds) -> Self {
        Self { turns }
    }

    pub fn check(&self, label: RilsaLabel, ctx: &Context) -> Verdict {
        let mut current = label;
        let mut applied = Vec::new();

        for rule in RULES {
            if !(rule.violated)(&current, ctx) {
                continue;
            }

            match (rule.correct)(&current, ctx) {
                Some(fixed) => {
                    debug!("rule `{}` corrected {} to {}", rule.name, current, fixed);
                    current = fixed;
                    applied.push(rule.name);
                }
                None => return Verdict::Flagged { rule: rule.name },
            }
        }

        match current.to_code() {
            Some(code) if applied.is_empty() => Verdict::Ok(code),
            Some(code) => Verdict::Corrected {
                from: label,
                code,
                rules: applied,
            },
            None => Verdict::Flagged {
                rule: "index-presence",
            },
        }
    }

    pub fn validate(&self, trajectory: &Trajectory, pair: AccessPair, label: RilsaLabel) -> Verdict {
        let ctx = Context {
            class: trajectory.class,
            origin: pair.origin,
            destination: pair.destination,
            turn_angle_deg: trajectory.turn_angle_deg(),
            turns: self.turns,
        };

        self.check(label, &ctx)
    }
}

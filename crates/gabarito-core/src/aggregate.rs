use crate::model::{TaskId, TaskOutcome, Verdict};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LevelStats {
    pub evaluated: u32,
    pub success: u32,
    /// `success / evaluated` rounded to two decimals; 0 when nothing was evaluated.
    pub rate: f64,
}

impl LevelStats {
    fn record(&mut self, verdict: Verdict) {
        self.evaluated += 1;
        if verdict.is_pass() {
            self.success += 1;
        }
    }

    fn finish(&mut self) {
        self.rate = round2(if self.evaluated == 0 {
            0.0
        } else {
            f64::from(self.success) / f64::from(self.evaluated)
        });
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Per-level and overall success counts for one response set.
///
/// Serializes as `{"L1": {...}, ..., "overall": {...}}` with only levels that
/// have at least one evaluated task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Summary {
    pub levels: BTreeMap<String, LevelStats>,
    pub overall: LevelStats,
}

impl Serialize for Summary {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        let mut map = s.serialize_map(Some(self.levels.len() + 1))?;
        for (level, stats) in &self.levels {
            map.serialize_entry(level, stats)?;
        }
        map.serialize_entry("overall", &self.overall)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Summary {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let mut levels = BTreeMap::<String, LevelStats>::deserialize(d)?;
        let overall = levels
            .remove("overall")
            .ok_or_else(|| serde::de::Error::missing_field("overall"))?;
        Ok(Self { levels, overall })
    }
}

impl Summary {
    pub fn level(&self, key: &str) -> Option<&LevelStats> {
        self.levels.get(key)
    }
}

/// Folds verdicts into a [`Summary`]. `None` (inconclusive) entries are skipped.
pub fn summarize<'a, I>(verdicts: I) -> Summary
where
    I: IntoIterator<Item = (&'a TaskId, Option<Verdict>)>,
{
    let mut summary = Summary::default();
    for (id, verdict) in verdicts {
        let Some(verdict) = verdict else { continue };
        summary
            .levels
            .entry(id.level_key())
            .or_default()
            .record(verdict);
        summary.overall.record(verdict);
    }
    for stats in summary.levels.values_mut() {
        stats.finish();
    }
    summary.overall.finish();
    summary
}

pub fn summarize_outcomes(outcomes: &BTreeMap<TaskId, TaskOutcome>) -> Summary {
    summarize(outcomes.iter().map(|(id, o)| (id, o.verdict())))
}

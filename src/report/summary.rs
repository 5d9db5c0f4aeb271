use crate::record::{Gender, StoredRecord, RESISTANCE_FIELDS};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

/// 性别计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GenderCounts {
    pub male: usize,
    pub female: usize,
}

/// 记录汇总
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    /// 记录总数
    pub total: usize,
    /// 只有当至少一条记录带有 `Gender` 时才统计
    pub gender: Option<GenderCounts>,
    /// 菌种分布，按数量降序，数量相同时按名称
    pub species: Vec<(String, usize)>,
    /// 耐药结果为 "1" 的记录数；只包含至少出现过一次的字段
    pub resistance: Vec<(&'static str, usize)>,
}

impl Summary {
    pub fn from_records(records: &[StoredRecord]) -> Self {
        let gender = records
            .iter()
            .any(|r| r.fields.gender.is_some())
            .then(|| GenderCounts {
                male: count_gender(records, Gender::Male),
                female: count_gender(records, Gender::Female),
            });

        let mut species_counts: HashMap<&str, usize> = HashMap::new();
        for species in records.iter().filter_map(|r| r.fields.species.as_deref()) {
            *species_counts.entry(species).or_default() += 1;
        }
        let mut species: Vec<(String, usize)> = species_counts
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        species.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let resistance = RESISTANCE_FIELDS
            .iter()
            .enumerate()
            .filter_map(|(index, field)| {
                let values: Vec<Option<&str>> = records
                    .iter()
                    .map(|r| r.fields.resistance_outcomes()[index].1)
                    .collect();
                values
                    .iter()
                    .any(Option::is_some)
                    .then(|| (*field, values.iter().filter(|v| **v == Some("1")).count()))
            })
            .collect();

        Self {
            total: records.len(),
            gender,
            species,
            resistance,
        }
    }
}

fn count_gender(records: &[StoredRecord], gender: Gender) -> usize {
    records
        .iter()
        .filter(|r| r.fields.gender.as_deref() == Some(gender.as_str()))
        .count()
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "记录总数: {}", self.total)?;
        if let Some(gender) = &self.gender {
            writeln!(f, "男性患者: {}", gender.male)?;
            writeln!(f, "女性患者: {}", gender.female)?;
        }

        if !self.species.is_empty() {
            writeln!(f)?;
            writeln!(f, "菌种分布:")?;
            for (name, count) in &self.species {
                writeln!(f, "  {:<20} {}", name, count)?;
            }
        }

        if !self.resistance.is_empty() {
            writeln!(f)?;
            writeln!(f, "耐药情况:")?;
            for (field, count) in &self.resistance {
                writeln!(f, "  {:<20} {}", field, count)?;
            }
        }
        Ok(())
    }
}

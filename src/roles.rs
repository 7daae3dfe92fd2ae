use std::fmt;

use anyhow::{Context, Result};
use regex::Regex;

use crate::models::CanonicalTable;

/// Physical quantity a column carries, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnRole {
    Power,
    Energy,
    Irradiance,
    Temperature,
    Voltage,
    Current,
    WindSpeed,
    Humidity,
}

impl fmt::Display for ColumnRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColumnRole::Power => "power",
            ColumnRole::Energy => "energy",
            ColumnRole::Irradiance => "irradiance",
            ColumnRole::Temperature => "temperature",
            ColumnRole::Voltage => "voltage",
            ColumnRole::Current => "current",
            ColumnRole::WindSpeed => "wind_speed",
            ColumnRole::Humidity => "humidity",
        })
    }
}

#[derive(Debug, Clone)]
pub struct RoleRule {
    pub role: ColumnRole,
    pattern: Regex,
}

impl RoleRule {
    pub fn new(role: ColumnRole, pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .with_context(|| format!("invalid role pattern '{}'", pattern))?;
        Ok(Self { role, pattern })
    }

    pub fn matches(&self, name: &str) -> bool {
        self.pattern.is_match(name)
    }
}

/// Ordered name-pattern rules; the first matching rule decides the role.
///
/// Column names arrive already sanitized, so patterns only need to cover the
/// plant vocabulary ("Power_MW", "BLOCK2_INV5_Temp", "Wind_Speed_ms"), not
/// arbitrary spreadsheet headers.
#[derive(Debug, Clone)]
pub struct RoleSchema {
    rules: Vec<RoleRule>,
}

impl RoleSchema {
    pub fn new(rules: Vec<RoleRule>) -> Self {
        Self { rules }
    }

    pub fn from_rules(pairs: &[(ColumnRole, &str)]) -> Result<Self> {
        let rules = pairs
            .iter()
            .map(|(role, pattern)| RoleRule::new(*role, pattern))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(rules))
    }

    /// Rules for the names this plant's sources actually produce. Power is
    /// checked before energy so "_MW" capacity columns never read as meters.
    pub fn standard() -> Self {
        let pairs = [
            (ColumnRole::Power, r"(?i)(power|_mw\b)"),
            (ColumnRole::Irradiance, r"(?i)irr"),
            (ColumnRole::Temperature, r"(?i)temp"),
            (ColumnRole::Voltage, r"(?i)volt"),
            (ColumnRole::Current, r"(?i)(current|amp)"),
            (ColumnRole::Energy, r"(?i)(energy|kwh)"),
            (ColumnRole::WindSpeed, r"(?i)wind"),
            (ColumnRole::Humidity, r"(?i)humid"),
        ];
        let rules = pairs
            .iter()
            .map(|(role, pattern)| RoleRule {
                role: *role,
                pattern: Regex::new(pattern).unwrap(),
            })
            .collect();
        Self { rules }
    }

    pub fn role_of(&self, name: &str) -> Option<ColumnRole> {
        self.rules
            .iter()
            .find(|rule| rule.matches(name))
            .map(|rule| rule.role)
    }

    /// Column names carrying the given role, in table order.
    pub fn columns_with_role(&self, table: &CanonicalTable, role: ColumnRole) -> Vec<String> {
        table
            .columns()
            .iter()
            .filter(|c| self.role_of(&c.name) == Some(role))
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn first_with_role(&self, table: &CanonicalTable, role: ColumnRole) -> Option<String> {
        table
            .columns()
            .iter()
            .find(|c| self.role_of(&c.name) == Some(role))
            .map(|c| c.name.clone())
    }

    /// Role-bearing columns in table order, capped. These are the candidates
    /// for rolling windows, interactions, and chart selection.
    pub fn important_columns(&self, table: &CanonicalTable, cap: usize) -> Vec<String> {
        table
            .columns()
            .iter()
            .filter(|c| self.role_of(&c.name).is_some())
            .take(cap)
            .map(|c| c.name.clone())
            .collect()
    }
}

impl Default for RoleSchema {
    fn default() -> Self {
        Self::standard()
    }
}

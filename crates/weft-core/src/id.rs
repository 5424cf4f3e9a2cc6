//! Strongly-typed identifiers for weft entities.
//!
//! All identifiers are:
//! - **Strongly typed**: Prevents mixing up different ID types at compile time
//! - **Printable**: `Display` renders the canonical wire form
//! - **Parseable**: `FromStr` accepts the canonical form back
//!
//! # Example
//!
//! ```rust
//! use weft_core::id::DagId;
//!
//! let dag_id = DagId::new("analytics", "daily-ingest", 1_700_000_000_000);
//! assert_eq!(dag_id.to_string(), "analytics_daily-ingest_1700000000000");
//! let parsed: DagId = dag_id.to_string().parse().unwrap();
//! assert_eq!(parsed, dag_id);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A named, versioned pipeline: the (group, name) pair identifying a flow.
///
/// A flow is the recurring definition; one run of it is a flow execution,
/// identified by a [`DagId`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId {
    /// The group the flow belongs to.
    pub flow_group: String,
    /// The flow's name, unique within its group.
    pub flow_name: String,
}

impl FlowId {
    /// Creates a new flow identifier.
    pub fn new(flow_group: impl Into<String>, flow_name: impl Into<String>) -> Self {
        Self {
            flow_group: flow_group.into(),
            flow_name: flow_name.into(),
        }
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.flow_group, self.flow_name)
    }
}

/// The total key of one flow execution's DAG.
///
/// The `flow_execution_id` is assigned at orchestration time as milliseconds
/// since the epoch; besides identifying the execution it doubles as the DAG's
/// origin timestamp for retention accounting.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DagId {
    /// The group of the owning flow.
    pub flow_group: String,
    /// The name of the owning flow.
    pub flow_name: String,
    /// The execution this DAG belongs to (epoch milliseconds at orchestration).
    pub flow_execution_id: i64,
}

impl DagId {
    /// Creates a new DAG identifier.
    pub fn new(
        flow_group: impl Into<String>,
        flow_name: impl Into<String>,
        flow_execution_id: i64,
    ) -> Self {
        Self {
            flow_group: flow_group.into(),
            flow_name: flow_name.into(),
            flow_execution_id,
        }
    }

    /// Returns the identifier of the owning flow.
    #[must_use]
    pub fn flow_id(&self) -> FlowId {
        FlowId::new(self.flow_group.clone(), self.flow_name.clone())
    }

    /// Returns the orchestration instant encoded in the execution id.
    #[must_use]
    pub fn orchestrated_at(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.flow_execution_id)
            .unwrap_or_else(chrono::Utc::now)
    }
}

impl fmt::Display for DagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}",
            self.flow_group, self.flow_name, self.flow_execution_id
        )
    }
}

impl FromStr for DagId {
    type Err = Error;

    /// Parses the canonical `group_name_execId` form.
    ///
    /// The execution id is taken from the last `_`-separated segment and the
    /// group from the first, so a flow name may itself contain underscores.
    fn from_str(s: &str) -> Result<Self> {
        let (rest, execution) = s
            .rsplit_once('_')
            .ok_or_else(|| Error::invalid_id(format!("dag id '{s}' has no execution id")))?;
        let flow_execution_id = execution
            .parse::<i64>()
            .map_err(|e| Error::invalid_id(format!("dag id '{s}' execution id: {e}")))?;
        let (flow_group, flow_name) = rest
            .split_once('_')
            .ok_or_else(|| Error::invalid_id(format!("dag id '{s}' has no flow name")))?;
        Ok(Self::new(flow_group, flow_name, flow_execution_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dag_id_round_trips_through_display() {
        let dag_id = DagId::new("etl", "orders_hourly", 1_690_000_123_456);
        let parsed: DagId = dag_id.to_string().parse().unwrap();
        assert_eq!(parsed, dag_id);
    }

    #[test]
    fn dag_id_parse_keeps_underscores_in_flow_name() {
        let parsed: DagId = "etl_orders_hourly_42".parse().unwrap();
        assert_eq!(parsed.flow_group, "etl");
        assert_eq!(parsed.flow_name, "orders_hourly");
        assert_eq!(parsed.flow_execution_id, 42);
    }

    #[test]
    fn dag_id_parse_rejects_garbage() {
        assert!("".parse::<DagId>().is_err());
        assert!("no-separators".parse::<DagId>().is_err());
        assert!("group_name_notanumber".parse::<DagId>().is_err());
    }

    #[test]
    fn flow_id_display() {
        assert_eq!(FlowId::new("etl", "orders").to_string(), "etl.orders");
    }
}

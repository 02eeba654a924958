//! Static per-map routing data
//!
//! Each map is an ordered rule list: the first rule whose cell matches the
//! agent's grid cell and whose door list has at least one open door wins.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};
use crate::types::{BBox, Point, RoomState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Agent grid cell, `"row-col"`.
    pub cell: String,
    /// Rule fires when any of these cells has an open door.
    pub doors_any: Vec<String>,
    pub target: Point,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingTable {
    #[serde(default)]
    pub maps: HashMap<String, Vec<RouteRule>>,
    /// Where to walk when a waypoint marker shows but no rule applies.
    #[serde(default)]
    pub marker_target: Option<Point>,
}

impl RoutingTable {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let table: RoutingTable =
            serde_json::from_str(raw).map_err(|e| CoreError::Config(e.to_string()))?;
        for (map, rules) in &table.maps {
            if let Some(bad) = rules.iter().find(|r| parse_cell(&r.cell).is_none()) {
                return Err(CoreError::Config(format!("{map}: bad cell {:?}", bad.cell)));
            }
        }
        Ok(table)
    }

    pub fn lookup(&self, map_id: &str, cell: &str, room: &RoomState) -> Option<Point> {
        self.maps
            .get(map_id)?
            .iter()
            .find(|r| r.cell == cell && r.doors_any.iter().any(|d| room.is_open(d)))
            .map(|r| r.target)
    }
}

/// `"row-col"` to a 1-based pair.
pub fn parse_cell(cell: &str) -> Option<(u32, u32)> {
    let (row, col) = cell.split_once('-')?;
    let row = row.trim().parse().ok()?;
    let col = col.trim().parse().ok()?;
    (row > 0 && col > 0).then_some((row, col))
}

/// Grid cell of `point` inside `region`, clamped to the grid edges.
pub fn grid_cell(point: Point, region: BBox, rows: u32, cols: u32) -> String {
    let rows = rows.max(1);
    let cols = cols.max(1);
    let cell_w = (region.width() / cols as i32).max(1);
    let cell_h = (region.height() / rows as i32).max(1);
    let col = ((point.x - region.x1).div_euclid(cell_w) + 1).clamp(1, cols as i32);
    let row = ((point.y - region.y1).div_euclid(cell_h) + 1).clamp(1, rows as i32);
    format!("{row}-{col}")
}

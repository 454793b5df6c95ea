//! Grid positions.
//!
//! Stored as `"x,y"`. Agents also send `[x, y]` or `{"x": .., "y": ..}`.

use serde_json::Value;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Read a position out of an agent reply value.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => s.parse().ok(),
            Value::Array(items) if items.len() == 2 => {
                Some(Self::new(as_coord(&items[0])?, as_coord(&items[1])?))
            }
            Value::Object(map) => Some(Self::new(
                as_coord(map.get("x")?)?,
                as_coord(map.get("y")?)?,
            )),
            _ => None,
        }
    }

    /// Every cell of the rectangle spanned by `self` and `other`, inclusive,
    /// row by row. Lazy, so callers bound how many cells they take.
    pub fn span(self, other: Position) -> impl Iterator<Item = Position> {
        let (x0, x1) = (self.x.min(other.x), self.x.max(other.x));
        let (y0, y1) = (self.y.min(other.y), self.y.max(other.y));
        (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| Position::new(x, y)))
    }

    /// Whether the position lies on a `width` x `height` grid.
    pub fn within(&self, width: i32, height: i32) -> bool {
        (0..width).contains(&self.x) && (0..height).contains(&self.y)
    }

    /// Nearest cell on a `width` x `height` grid.
    pub fn clamp_to(self, width: i32, height: i32) -> Position {
        Position::new(
            self.x.clamp(0, (width - 1).max(0)),
            self.y.clamp(0, (height - 1).max(0)),
        )
    }
}

fn as_coord(value: &Value) -> Option<i32> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .and_then(|n| i32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for Position {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')');
        let (x, y) = trimmed
            .split_once(',')
            .ok_or_else(|| format!("invalid position: {}", s))?;
        let x = x.trim().parse().map_err(|_| format!("invalid x in {}", s))?;
        let y = y.trim().parse().map_err(|_| format!("invalid y in {}", s))?;
        Ok(Self::new(x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_every_reply_shape() {
        let expected = Position::new(3, 4);
        assert_eq!(Position::from_value(&json!("3,4")), Some(expected));
        assert_eq!(Position::from_value(&json!(" (3, 4) ")), Some(expected));
        assert_eq!(Position::from_value(&json!([3, 4])), Some(expected));
        assert_eq!(Position::from_value(&json!({"x": 3, "y": "4"})), Some(expected));
        assert_eq!(Position::from_value(&json!("north")), None);
        assert_eq!(Position::from_value(&json!([1])), None);
    }

    #[test]
    fn span_covers_the_rectangle() {
        let cells: Vec<_> = Position::new(2, 1).span(Position::new(1, 2)).collect();
        assert_eq!(
            cells,
            vec![
                Position::new(1, 1),
                Position::new(2, 1),
                Position::new(1, 2),
                Position::new(2, 2),
            ]
        );
        assert_eq!(Position::new(5, 5).span(Position::new(5, 5)).count(), 1);
    }

    #[test]
    fn huge_spans_are_produced_lazily() {
        let corner = Position::new(i32::MIN, i32::MIN);
        let mut cells = corner.span(Position::new(i32::MAX, i32::MAX));
        assert_eq!(cells.next(), Some(corner));
        assert_eq!(cells.next(), Some(Position::new(i32::MIN + 1, i32::MIN)));
    }

    #[test]
    fn clamps_onto_the_grid() {
        assert!(Position::new(9, 0).within(10, 10));
        assert!(!Position::new(10, 0).within(10, 10));
        assert!(!Position::new(-1, 3).within(10, 10));
        assert_eq!(Position::new(i32::MAX, -4).clamp_to(10, 10), Position::new(9, 0));
        assert_eq!(Position::new(3, 4).clamp_to(10, 10), Position::new(3, 4));
    }

    #[test]
    fn displays_as_stored() {
        assert_eq!(Position::new(-1, 7).to_string(), "-1,7");
    }
}

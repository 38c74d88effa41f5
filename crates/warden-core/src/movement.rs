use serde::{Deserialize, Serialize};

/// Horizontal movement directions the activity injector chooses from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Back,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Forward,
        Direction::Back,
        Direction::Left,
        Direction::Right,
    ];
}

/// A combined movement intent issued to a session in one pulse.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementIntent {
    pub direction: Direction,
    pub jump: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_wire_names() {
        let names: Vec<String> = Direction::ALL
            .iter()
            .map(|d| serde_json::to_string(d).unwrap())
            .collect();
        assert_eq!(names, ["\"forward\"", "\"back\"", "\"left\"", "\"right\""]);
    }
}

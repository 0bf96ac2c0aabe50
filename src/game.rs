//! The 8x8 treasure-hunt grid: placement, movement and discovery.
//!
//! Grounded in `server.c`'s `init_game`/`find_treasure_files`/
//! `handle_movement`/`check_treasure_discovery`.

use rand::Rng;

/// Grid extent along both axes.
pub const GRID_SIZE: u8 = 8;
/// Maximum number of treasures a game can hold.
pub const MAX_TREASURES: usize = 8;

/// A move direction, carrying the same axis convention as the wire
/// `MOVE_*` tags: x grows east, y grows north.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Right,
    Up,
    Down,
    Left,
}

/// A file placed on a grid cell, delivered when the player reaches it.
#[derive(Debug, Clone)]
pub struct Treasure {
    pub x: u8,
    pub y: u8,
    pub filename: String,
    pub discovered: bool,
}

/// Outcome of a move attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Moved { x: u8, y: u8 },
    OutOfBounds,
}

/// `{player_x, player_y, treasures}`, the server's authoritative state.
pub struct Game {
    pub player_x: u8,
    pub player_y: u8,
    pub treasures: Vec<Treasure>,
}

impl Game {
    /// Build a fresh game: player at (0,0), treasures placed on
    /// distinct uniformly random cells. `file_list` is filtered to
    /// names matching `^[1-8]\..+` and capped at [`MAX_TREASURES`],
    /// mirroring `find_treasure_files`'s directory scan.
    pub fn init<R: Rng>(rng: &mut R, file_list: &[String]) -> Self {
        let filenames = select_treasure_files(file_list);
        let mut treasures = Vec::with_capacity(filenames.len());
        for filename in filenames {
            let (x, y) = loop {
                let x = rng.gen_range(0..GRID_SIZE);
                let y = rng.gen_range(0..GRID_SIZE);
                if !treasures.iter().any(|t: &Treasure| t.x == x && t.y == y) {
                    break (x, y);
                }
            };
            treasures.push(Treasure {
                x,
                y,
                filename,
                discovered: false,
            });
        }
        Game {
            player_x: 0,
            player_y: 0,
            treasures,
        }
    }

    /// Attempt to move in `dir`; commits the position only if the
    /// result stays within `[0, GRID_SIZE)` on both axes.
    pub fn try_move(&mut self, dir: Direction) -> MoveOutcome {
        let (dx, dy): (i16, i16) = match dir {
            Direction::Right => (1, 0),
            Direction::Left => (-1, 0),
            Direction::Up => (0, 1),
            Direction::Down => (0, -1),
        };
        let new_x = self.player_x as i16 + dx;
        let new_y = self.player_y as i16 + dy;
        if new_x < 0 || new_x >= GRID_SIZE as i16 || new_y < 0 || new_y >= GRID_SIZE as i16 {
            return MoveOutcome::OutOfBounds;
        }
        self.player_x = new_x as u8;
        self.player_y = new_y as u8;
        MoveOutcome::Moved {
            x: self.player_x,
            y: self.player_y,
        }
    }

    /// If an undiscovered treasure sits at the player's current
    /// position, flag it discovered and return it.
    pub fn discover(&mut self) -> Option<&Treasure> {
        let idx = self
            .treasures
            .iter()
            .position(|t| !t.discovered && t.x == self.player_x && t.y == self.player_y)?;
        self.treasures[idx].discovered = true;
        Some(&self.treasures[idx])
    }

    pub fn undiscovered_count(&self) -> usize {
        self.treasures.iter().filter(|t| !t.discovered).count()
    }
}

/// Filter `names` to the `^[1-8]\..+` pattern used by the original
/// directory scan, preserving input order, capped at
/// [`MAX_TREASURES`].
fn select_treasure_files(names: &[String]) -> Vec<String> {
    names
        .iter()
        .filter(|name| is_treasure_filename(name))
        .take(MAX_TREASURES)
        .cloned()
        .collect()
}

fn is_treasure_filename(name: &str) -> bool {
    let bytes = name.as_bytes();
    bytes.len() > 2 && bytes[0].is_ascii_digit() && (b'1'..=b'8').contains(&bytes[0]) && bytes[1] == b'.'
}

/// Client-side record of one grid cell, tracked as the player explores.
#[derive(Debug, Clone, Default)]
pub struct ClientCell {
    pub visited: bool,
    pub has_treasure: bool,
    pub treasure_name: Option<String>,
}

/// The client's local view of the grid: what it has seen so far. The
/// server is authoritative; this exists purely to let the session
/// driver render progress without re-deriving it from wire traffic.
pub struct ClientView {
    cells: [[ClientCell; GRID_SIZE as usize]; GRID_SIZE as usize],
    pub player_x: u8,
    pub player_y: u8,
}

impl ClientView {
    pub fn new() -> Self {
        let mut view = ClientView {
            cells: std::array::from_fn(|_| std::array::from_fn(|_| ClientCell::default())),
            player_x: 0,
            player_y: 0,
        };
        view.mark_visited(0, 0);
        view
    }

    pub fn mark_visited(&mut self, x: u8, y: u8) {
        self.cells[y as usize][x as usize].visited = true;
    }

    pub fn mark_treasure_found(&mut self, x: u8, y: u8) {
        self.cells[y as usize][x as usize].has_treasure = true;
    }

    /// Record the filename of a treasure discovered at `(x, y)`, once
    /// the transfer's filename packet has revealed it.
    pub fn mark_treasure_name(&mut self, x: u8, y: u8, name: String) {
        self.cells[y as usize][x as usize].treasure_name = Some(name);
    }

    pub fn set_position(&mut self, x: u8, y: u8) {
        self.player_x = x;
        self.player_y = y;
        self.mark_visited(x, y);
    }

    pub fn cell(&self, x: u8, y: u8) -> &ClientCell {
        &self.cells[y as usize][x as usize]
    }
}

impl Default for ClientView {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn files(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn init_filters_and_caps_treasure_files() {
        let names = files(&[
            "1.txt", "readme.md", "2.jpg", "notdigit.x", "9.txt", "3.mp3", "4.wav", "5.ogg", "6.png", "7.gif",
            "8.doc", "1.extra",
        ]);
        let mut rng = StdRng::seed_from_u64(1);
        let game = Game::init(&mut rng, &names);
        assert_eq!(game.treasures.len(), MAX_TREASURES);
        assert!(game.treasures.iter().all(|t| !t.filename.starts_with("readme")));
        assert!(game.treasures.iter().all(|t| !t.filename.starts_with('9')));
    }

    #[test]
    fn treasure_positions_are_pairwise_distinct() {
        let names = files(&["1.a", "2.a", "3.a", "4.a", "5.a", "6.a", "7.a", "8.a"]);
        let mut rng = StdRng::seed_from_u64(42);
        let game = Game::init(&mut rng, &names);
        for (i, a) in game.treasures.iter().enumerate() {
            for b in &game.treasures[i + 1..] {
                assert!(a.x != b.x || a.y != b.y);
            }
        }
    }

    #[test]
    fn move_right_from_origin_succeeds() {
        let mut game = Game::init(&mut rand::rngs::mock::StepRng::new(0, 1), &[]);
        assert_eq!(game.try_move(Direction::Right), MoveOutcome::Moved { x: 1, y: 0 });
    }

    #[test]
    fn move_left_from_origin_is_out_of_bounds() {
        let mut game = Game::init(&mut rand::rngs::mock::StepRng::new(0, 1), &[]);
        assert_eq!(game.try_move(Direction::Left), MoveOutcome::OutOfBounds);
        assert_eq!((game.player_x, game.player_y), (0, 0));
    }

    #[test]
    fn move_up_from_top_row_is_out_of_bounds() {
        let mut game = Game::init(&mut rand::rngs::mock::StepRng::new(0, 1), &[]);
        game.player_y = GRID_SIZE - 1;
        assert_eq!(game.try_move(Direction::Up), MoveOutcome::OutOfBounds);
    }

    #[test]
    fn discover_flags_treasure_once() {
        let mut game = Game {
            player_x: 2,
            player_y: 0,
            treasures: vec![Treasure {
                x: 2,
                y: 0,
                filename: "2.txt".into(),
                discovered: false,
            }],
        };
        let found = game.discover().unwrap();
        assert_eq!(found.filename, "2.txt");
        assert!(game.discover().is_none());
    }

    #[test]
    fn client_view_tracks_visited_and_treasure_cells() {
        let mut view = ClientView::new();
        assert!(view.cell(0, 0).visited);
        view.set_position(1, 0);
        assert!(view.cell(1, 0).visited);
        assert!(!view.cell(1, 0).has_treasure);
        view.mark_treasure_found(1, 0);
        assert!(view.cell(1, 0).has_treasure);
        assert!(view.cell(1, 0).treasure_name.is_none());
        view.mark_treasure_name(1, 0, "2.txt".into());
        assert_eq!(view.cell(1, 0).treasure_name.as_deref(), Some("2.txt"));
    }
}

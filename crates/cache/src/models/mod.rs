mod game;

pub use self::game::Game;
pub(crate) use self::game::GameRow;

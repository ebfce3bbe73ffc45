use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("invalid configuration")]
    Config,
    #[display("could not prepare the library folders")]
    Setup,
    #[display("could not open the game database")]
    Database,
    #[display("import pipeline failed")]
    Library,
}

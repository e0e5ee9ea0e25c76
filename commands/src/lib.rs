pub mod ls;
pub mod ops;
pub mod shell;
pub mod tar;

pub use ls::{File, LsCommand, LsOutput, Recursion};
pub use ops::{Base64Command, ChecksumCommand, ChownCommand, CpCommand, HeadCommand, MkdirCommand, MvCommand, RmCommand, StatCommand, SymlinkCommand, TailCommand, ViewCommand};
pub use tar::TarCommand;

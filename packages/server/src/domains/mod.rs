// Business domains
pub mod fanout;
pub mod helpers;
pub mod location;
pub mod matching;
pub mod presence;
pub mod spatial;
pub mod tasks;

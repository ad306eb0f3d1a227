pub mod candidate;

pub use candidate::MatchCandidate;

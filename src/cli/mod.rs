pub mod chain;
pub mod doctor;
pub mod ingest;
pub mod inspect;
pub mod maintenance;
pub mod recall;
pub mod serve;
pub mod stats;

use memoria::memory::truncate_chars;
use memoria::memory::types::MemoryAtom;

/// One-line preview used by listing commands.
fn atom_line(atom: &MemoryAtom) -> String {
    format!(
        "{} [{}] {} → {}",
        atom.timestamp.format("%Y-%m-%d %H:%M"),
        atom.topic,
        truncate_chars(&atom.user_input, 60),
        truncate_chars(&atom.response, 60),
    )
}

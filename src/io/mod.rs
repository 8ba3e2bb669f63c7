pub mod colmap;
pub mod export;
pub mod ply;

pub use colmap::{ColmapProject, read_model, write_model};
pub use export::{TagExport, write_convergence_csv, write_scale_factor};
pub use ply::{read_ply, write_ply};

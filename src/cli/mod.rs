//! CLI commands for SketchLoop.
//!
//! Commands are organized into:
//! - **Session command**: run (drives the exploration loop against a device)
//! - **Inspection commands**: history, show, training (read saved state)
//! - **Utility command**: render (preview a generated sketch offline)

// Session command
pub mod run;

// Inspection commands
pub mod history;
pub mod show;
pub mod training;

// Utility command
pub mod render;

pub use history::HistoryCommand;
pub use render::RenderCommand;
pub use run::RunCommand;
pub use show::ShowCommand;
pub use training::TrainingCommand;

//! Model generation storage and request-time inference

mod artifacts;
mod gate;


pub use artifacts::{
    compute_checksum, load_generation, read_manifest, read_scaler, read_thresholds,
    write_generation, GenerationManifest, LoadedArtifacts, ThresholdsSource, MANIFEST_FILE,
    SCALER_FILE, THRESHOLDS_FILE,
};
pub use gate::{GateResponse, InferenceGate, LeakAssessment, WindowRequest};

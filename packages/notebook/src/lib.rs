// ABOUTME: Notebook persistence for Cellar
// ABOUTME: Cells with dense positions, cooperative cell locks, datasets and externalized outputs

pub mod datasets;
pub mod error;
pub mod lock;
pub mod outputs;
pub mod storage;
pub mod types;

pub use datasets::DatasetLocator;
pub use error::{Result, StorageError};
pub use outputs::OutputStore;
pub use storage::NotebookStorage;
pub use types::{
    Cell, CellKind, CellOutput, CellStatus, Dataset, ExecutionRecord, LockStatus, Notebook,
    OutputKind, OutputRef,
};

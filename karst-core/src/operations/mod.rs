pub mod delete_file;
pub mod node_data;
pub mod put_file;
pub mod unseal_file;

#[cfg(test)]
pub(crate) mod testing;

pub use delete_file::{
    DeleteFileOperation, DeleteFileOperationOutcome, DeleteFileOperationRequest,
    DeleteFileOperationResult,
};
pub use node_data::{NodeDataOperation, NodeDataOperationOutcome, NodeDataOperationRequest};
pub use put_file::{
    DeclaredFile, PutFileOperation, PutFileOperationOutcome, PutFileOperationRequest,
    PutFileOperationResult, PutMode,
};
pub use unseal_file::{
    UnsealFileOperation, UnsealFileOperationOutcome, UnsealFileOperationRequest,
};

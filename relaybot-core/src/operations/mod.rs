pub mod transfer_object;

pub use transfer_object::{
    TransferObjectOperation, TransferObjectOperationOutcome, TransferObjectOperationRequest,
    TransferObjectOperationResult,
};

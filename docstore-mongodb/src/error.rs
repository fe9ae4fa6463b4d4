//! Translation of driver errors into store errors.

use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};

use docstore_core::error::DocumentStoreError;

/// Server code for a write rejected by the collection validator.
pub const DOCUMENT_VALIDATION_FAILURE: i32 = 121;

/// Server code for creating a collection that already exists.
pub const NAMESPACE_EXISTS: i32 = 48;

/// Maps a driver error onto the backend error contract.
pub fn into_store_error(err: MongoError) -> DocumentStoreError {
    let message = err.to_string();

    match classify(&err.kind) {
        Class::Connection => DocumentStoreError::Connection(message),
        Class::Code(DOCUMENT_VALIDATION_FAILURE) => DocumentStoreError::DocumentValidation(message),
        Class::Code(NAMESPACE_EXISTS) => DocumentStoreError::CollectionAlreadyExists(message),
        Class::Code(_) | Class::Other => DocumentStoreError::Backend(message),
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Class {
    Connection,
    Code(i32),
    Other,
}

fn classify(kind: &ErrorKind) -> Class {
    match kind {
        ErrorKind::ServerSelection { .. }
        | ErrorKind::ConnectionPoolCleared { .. }
        | ErrorKind::DnsResolve { .. }
        | ErrorKind::Authentication { .. }
        | ErrorKind::Io(_) => Class::Connection,
        ErrorKind::Command(command) => Class::Code(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Class::Code(write.code),
        // Ordered inserts stop at the first failing document.
        ErrorKind::InsertMany(insert) => insert
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map_or(Class::Other, |first| Class::Code(first.code)),
        _ => Class::Other,
    }
}

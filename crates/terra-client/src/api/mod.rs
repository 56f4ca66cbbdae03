mod packument;
mod tarball;

pub use packument::PackumentBatch;

pub mod batch;
pub mod fields;
pub mod raw_reading_csv_file;
pub mod raw_reading_json_file;

pub use batch::JsonBatchSource;
pub use raw_reading_csv_file::RawReadingCsvFileSource;
pub use raw_reading_json_file::RawReadingJsonFileSource;

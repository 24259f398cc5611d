pub mod sqlite_storage;
pub mod supabase;

pub use sqlite_storage::SqliteStorage;
pub use supabase::SupabaseAdapter;

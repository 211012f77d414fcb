pub mod file;
pub mod io_stats;
pub mod protection;

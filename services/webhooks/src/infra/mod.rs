pub mod db;
pub mod delivery;

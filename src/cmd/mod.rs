use crate::Result;

pub mod exports;
pub mod members;
pub mod messages;
pub mod schedule;
pub mod serve;
pub mod targets;

pub fn print_json<T: ?Sized + serde::Serialize>(value: &T) -> Result {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

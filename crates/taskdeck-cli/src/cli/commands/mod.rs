pub mod assignees;
pub mod doctor;
pub mod helpers;
pub mod init;
pub mod projects;
pub mod sprints;
pub mod sync;
pub mod tasks;

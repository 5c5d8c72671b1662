pub mod ecs;
pub mod lambda;
pub mod object_store;

mod bus;

pub use bus::{ActionEvent, EventBus, EventEmitter, OrchestrationEvent};

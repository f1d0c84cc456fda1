use vellum_primitives::Address;

/// Notification describing the outcome of one call-kind operation.
///
/// Events are advisory only: observers use them to learn about nested
/// call outcomes (a contained failure is visible nowhere else), but
/// they never feed back into authorization or state decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallEvent {
  pub target: Address,
  pub return_data: Vec<u8>,
  /// Failure description. Empty when the call completed normally.
  pub exception: String,
}

impl CallEvent {
  pub fn failed(&self) -> bool {
    !self.exception.is_empty()
  }
}

/// Receives one event per completed or failed call-kind operation.
pub trait EventSink {
  fn on_call(&mut self, event: CallEvent);
}

/// Sink that drops all notifications.
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
  fn on_call(&mut self, _event: CallEvent) {}
}

/// Collects events in memory so observers can inspect outcomes after
/// execution finished.
#[derive(Debug, Default)]
pub struct EventLog {
  events: Vec<CallEvent>,
}

impl EventLog {
  pub fn events(&self) -> &[CallEvent] {
    &self.events
  }

  /// The most recent event for a given target address.
  pub fn last_for(&self, target: &Address) -> Option<&CallEvent> {
    self.events.iter().rev().find(|ev| ev.target == *target)
  }

  pub fn last(&self) -> Option<&CallEvent> {
    self.events.last()
  }
}

impl EventSink for EventLog {
  fn on_call(&mut self, event: CallEvent) {
    self.events.push(event);
  }
}

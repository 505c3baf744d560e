// src/instance/director.rs

//! Routes by region tag to the `InstanceManager` responsible for it
//! (spec.md §4.E): a map keyed by a tag, looked up once per call, with
//! a typed miss error rather than a panic.

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::ControllerError;

use super::manager::InstanceManager;

/// Holds one `InstanceManager` per region tag (spec.md §4.E).
pub struct InstanceDirector {
    managers: HashMap<String, Arc<dyn InstanceManager>>,
}

impl InstanceDirector {
    pub fn new(managers: HashMap<String, Arc<dyn InstanceManager>>) -> Self {
        Self { managers }
    }

    pub fn manager(&self, region: &str) -> Result<Arc<dyn InstanceManager>, ControllerError> {
        self.managers
            .get(region)
            .cloned()
            .ok_or_else(|| ControllerError::UnknownRegion(region.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::manager::{CreatedInstance, MadeAvailable};
    use async_trait::async_trait;

    #[derive(Debug)]
    struct StubManager;

    #[async_trait]
    impl InstanceManager for StubManager {
        async fn create_instance(&self, _kind: &str) -> Result<CreatedInstance, ControllerError> {
            unimplemented!()
        }
        async fn start_instance(&self, _id: &str, _user_data: &str) -> Result<(), ControllerError> {
            unimplemented!()
        }
        async fn stop_instance(&self, _id: &str) -> Result<(), ControllerError> {
            unimplemented!()
        }
        async fn make_instance_available(
            &self,
            _id: &str,
            _allocation_id: &str,
        ) -> Result<MadeAvailable, ControllerError> {
            unimplemented!()
        }
        async fn make_instance_unavailable(&self, _association_id: &str) -> Result<(), ControllerError> {
            unimplemented!()
        }
    }

    #[test]
    fn unknown_region_fails_with_typed_error() {
        let director = InstanceDirector::new(HashMap::new());
        let err = director.manager("us-west").unwrap_err();
        assert!(matches!(err, ControllerError::UnknownRegion(r) if r == "us-west"));
    }

    #[test]
    fn known_region_resolves_its_manager() {
        let mut managers: HashMap<String, Arc<dyn InstanceManager>> = HashMap::new();
        managers.insert("us-west".to_string(), Arc::new(StubManager));
        let director = InstanceDirector::new(managers);
        assert!(director.manager("us-west").is_ok());
    }
}

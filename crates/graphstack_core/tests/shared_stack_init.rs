//! Shared stack configured explicitly at startup.

use graphstack_core::{
    Attribute, AttributeType, Entity, Model, PersistenceStack, StackConfig, StackError,
    StoreLocation,
};

#[test]
fn explicit_startup_config_becomes_the_shared_stack() {
    let model = Model::new(vec![
        Entity::new("Session").attribute(Attribute::new("token", AttributeType::Text))
    ])
    .unwrap();

    let installed = PersistenceStack::init_shared(&StackConfig::in_memory().with_model(model))
        .unwrap();
    let fetched = PersistenceStack::shared().unwrap();
    assert!(std::ptr::eq(installed, fetched));
    assert_eq!(fetched.lock().location(), &StoreLocation::InMemory);
    assert_eq!(fetched.lock().model().entity_names(), vec!["Session"]);

    let err = PersistenceStack::init_shared(&StackConfig::in_memory()).unwrap_err();
    assert!(matches!(err, StackError::SharedAlreadyInitialized));

    let independent = PersistenceStack::in_memory(Some(fetched.lock().model().clone())).unwrap();
    let mut shared = fetched.lock();
    let id = shared.context_mut().insert("Session").unwrap();
    assert!(independent.context().object(id).unwrap().is_none());
}

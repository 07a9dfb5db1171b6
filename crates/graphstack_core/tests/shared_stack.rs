//! Shared-stack behavior with environment-derived defaults.
//!
//! Kept as a single test: the shared stack and the environment are
//! process-wide.

use graphstack_core::{
    Attribute, AttributeType, Entity, FetchRequest, Model, PersistenceStack, SaveOutcome,
    StackConfig, StackError, StoreLocation,
};
use std::sync::{Arc, Barrier};

#[test]
fn shared_stack_is_created_once_from_environment_defaults() {
    let root = tempfile::tempdir().unwrap();
    let bundle_dir = root.path().join("models");
    std::fs::create_dir_all(&bundle_dir).unwrap();
    let notes = Model::new(vec![
        Entity::new("Note").attribute(Attribute::new("title", AttributeType::Text).required())
    ])
    .unwrap();
    let tags = Model::new(vec![
        Entity::new("Tag").attribute(Attribute::new("label", AttributeType::Text))
    ])
    .unwrap();
    std::fs::write(bundle_dir.join("notes.json"), notes.canonical_json()).unwrap();
    std::fs::write(bundle_dir.join("tags.json"), tags.canonical_json()).unwrap();

    std::env::set_var("GRAPHSTACK_BUNDLE_DIR", &bundle_dir);
    std::env::set_var("GRAPHSTACK_APP_NAME", "sharedapp");
    std::env::set_var("XDG_DATA_HOME", root.path().join("data"));
    std::env::set_var("XDG_CACHE_HOME", root.path().join("cache"));

    let workers = 8;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                barrier.wait();
                let shared = PersistenceStack::shared().unwrap();
                shared as *const _ as usize
            })
        })
        .collect();
    let addresses: Vec<usize> = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect();
    assert!(addresses.windows(2).all(|pair| pair[0] == pair[1]));

    let first = PersistenceStack::shared().unwrap();
    let second = PersistenceStack::shared().unwrap();
    assert!(std::ptr::eq(first, second));
    assert_eq!(first as *const _ as usize, addresses[0]);

    let store_path = root.path().join("data/sharedapp/sharedapp.sqlite");
    {
        let stack = first.lock();
        assert_eq!(stack.model().entity_names(), vec!["Note", "Tag"]);
        assert_eq!(stack.location(), &StoreLocation::File(store_path.clone()));
    }

    {
        let mut stack = first.lock();
        let context = stack.context_mut();
        let id = context.insert("Note").unwrap();
        context.set_value(id, "title", "through the shared stack").unwrap();
        assert!(matches!(stack.save().unwrap(), SaveOutcome::Saved(_)));
    }

    let independent = PersistenceStack::open(Some(store_path.as_path()), None).unwrap();
    let notes = independent
        .context()
        .fetch(&FetchRequest::new("Note"))
        .unwrap();
    assert_eq!(notes.len(), 1);
    assert!(!second.lock().context().has_changes());

    let err = PersistenceStack::init_shared(&StackConfig::in_memory()).unwrap_err();
    assert!(matches!(err, StackError::SharedAlreadyInitialized));
}

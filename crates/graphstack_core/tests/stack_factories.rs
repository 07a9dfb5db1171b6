//! Purpose-directory factories with environment-derived directories.
//!
//! Kept as a single test: the environment is process-wide.

use graphstack_core::{
    Attribute, AttributeType, Entity, Model, PersistenceStack, StackError, StoreLocation,
};
use graphstack_core::{ModelError, PathError};

fn model() -> Model {
    Model::new(vec![
        Entity::new("Photo").attribute(Attribute::new("caption", AttributeType::Text))
    ])
    .unwrap()
}

#[test]
fn cache_and_documents_factories_resolve_purpose_directories() {
    let root = tempfile::tempdir().unwrap();
    std::env::set_var("GRAPHSTACK_APP_NAME", "gallery");
    std::env::set_var("XDG_CACHE_HOME", root.path().join("cache"));
    std::env::set_var("XDG_DATA_HOME", root.path().join("data"));
    std::env::set_var("GRAPHSTACK_BUNDLE_DIR", root.path().join("no-models-here"));

    let cached = PersistenceStack::in_cache_file(None, Some(model())).unwrap();
    let cache_path = root.path().join("cache/gallery/gallery.sqlite");
    assert_eq!(cached.location(), &StoreLocation::File(cache_path.clone()));
    assert!(cache_path.is_file());

    let documents = PersistenceStack::in_documents_file(Some("photos.db"), Some(model())).unwrap();
    let documents_path = root.path().join("data/gallery/photos.db");
    assert_eq!(
        documents.location(),
        &StoreLocation::File(documents_path.clone())
    );
    assert!(documents_path.is_file());

    let default_documents = PersistenceStack::open(None, Some(model())).unwrap();
    assert_eq!(
        default_documents.location(),
        &StoreLocation::File(root.path().join("data/gallery/gallery.sqlite"))
    );

    let err = PersistenceStack::in_cache_file(Some("../escape.db"), Some(model())).unwrap_err();
    assert!(matches!(err, StackError::Path(PathError::InvalidFilename(_))));

    let err = PersistenceStack::in_memory(None).unwrap_err();
    assert!(matches!(err, StackError::Model(ModelError::NoModelsFound)));
}

//! The shipped config files load and wire up.

use std::path::Path;
use std::sync::Arc;

use orchid::config::{self, Overrides};
use orchid::llm::{BackendDescriptor, BackendKind};
use orchid::orchestrator::Orchestrator;
use orchid::subsystems::tools::{InMemoryMailbox, Mailbox};

#[test]
fn test_default_config_loads() {
    let cfg = config::load_from(Path::new("config/default.toml"), Overrides::default()).unwrap();
    assert_eq!(cfg.name, "orchid");
    assert_eq!(cfg.memory.context_turns, 3);
    let d = BackendDescriptor::from_config(&cfg.llm).unwrap();
    assert_eq!(d.kind, BackendKind::HttpInference);
}

#[test]
fn test_mailbox_fixture_loads() {
    let cfg = config::load_from(Path::new("config/default.toml"), Overrides::default()).unwrap();
    let fixture = cfg.mailbox.fixture.expect("default config names a fixture");
    let mailbox = InMemoryMailbox::from_json_file(&fixture).unwrap();
    assert_eq!(mailbox.total_count(), 5);
    assert_eq!(mailbox.unread_count(), 3);
    assert_eq!(mailbox.latest().unwrap().id, "m-005");
    assert_eq!(mailbox.search("RÉUNION").len(), 1);
}

#[tokio::test]
async fn test_orchestrator_from_default_config() {
    let mut cfg = config::load_from(Path::new("config/default.toml"), Overrides::default()).unwrap();
    cfg.llm.provider = "echo".into();
    let o = Orchestrator::from_config(&cfg, Arc::new(InMemoryMailbox::default())).unwrap();
    o.initialize().await.unwrap();
    assert!(o.generate("Bonjour", &[]).await.unwrap().starts_with("[echo]"));
}

/*!
# Meshwatch DevKit - Mocks et harness de test

Bibliothèque pour tester l'exporter sans broker MQTT :
- `MockMqttClient` : bus simulé, implémente `Publisher`
- `MeshMessageBuilder` : messages JSON de passerelle mesh
- `TestHarness` : pipeline complet + dispatcher d'alertes branchés sur le mock
*/

pub mod mqtt_stub;
pub mod test_utils;

pub use mqtt_stub::{MeshMessageBuilder, MockMqttClient};
pub use test_utils::TestHarness;

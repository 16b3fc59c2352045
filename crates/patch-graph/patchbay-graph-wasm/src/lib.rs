use patchbay_graph_core::{
    detect_bundle, Connection, EngineConfig, GraphError, GraphMutation, PatchGraph, PortEngine,
};
use wasm_bindgen::prelude::*;

fn to_js(err: String) -> JsValue {
    JsValue::from_str(&err)
}

fn mutations_json(result: Result<Vec<GraphMutation>, GraphError>) -> Result<String, String> {
    let applied = result.map_err(|e| e.to_string())?;
    serde_json::to_string(&applied).map_err(|e| e.to_string())
}

/// Graph plus engine, with every entry point speaking JSON strings.
struct Session {
    graph: PatchGraph,
    engine: PortEngine,
}

impl Session {
    fn new(config: EngineConfig) -> Self {
        Self {
            graph: PatchGraph::new(),
            engine: PortEngine::new(config),
        }
    }

    fn set_config(&mut self, json: &str) -> Result<(), String> {
        let config = EngineConfig::from_json_str(json).map_err(|e| e.to_string())?;
        self.engine = PortEngine::new(config);
        Ok(())
    }

    fn load_graph(&mut self, json: &str) -> Result<(), String> {
        self.graph = PatchGraph::from_json_str(json).map_err(|e| e.to_string())?;
        Ok(())
    }

    fn snapshot_json(&self) -> Result<String, String> {
        serde_json::to_string(&self.graph.to_snapshot()).map_err(|e| e.to_string())
    }

    fn connect(&mut self, connection_json: &str) -> Result<String, String> {
        let connection: Connection =
            serde_json::from_str(connection_json).map_err(|e| e.to_string())?;
        mutations_json(self.engine.connect(&mut self.graph, connection))
    }

    fn disconnect(&mut self, connection_id: &str) -> Result<String, String> {
        mutations_json(self.engine.disconnect(&mut self.graph, connection_id))
    }

    fn resync(&mut self, parent_id: &str) -> Result<String, String> {
        let applied = self
            .engine
            .resync(&mut self.graph, parent_id)
            .map(|m| m.into_iter().collect());
        mutations_json(applied)
    }

    fn set_port_label(
        &mut self,
        panel_id: &str,
        port_id: &str,
        label: &str,
    ) -> Result<String, String> {
        mutations_json(self.engine.set_port_label(&mut self.graph, panel_id, port_id, label))
    }

    fn rename_special_child(&mut self, child_id: &str, name: &str) -> Result<String, String> {
        mutations_json(self.engine.rename_special_child(&mut self.graph, child_id, name))
    }

    fn toggle_bundle(&mut self, panel_id: &str, port_id: &str) -> Result<String, String> {
        mutations_json(self.engine.toggle_bundle(&mut self.graph, panel_id, port_id))
    }

    fn collapse_bundle(&mut self, panel_id: &str, port_id: &str) -> Result<String, String> {
        mutations_json(self.engine.collapse_bundle(&mut self.graph, panel_id, port_id))
    }

    /// Bundle description for a source port, or `"null"`.
    fn detect_bundle_json(&self, node_id: &str, port_id: &str) -> Result<String, String> {
        let info = detect_bundle(
            node_id,
            port_id,
            self.graph.nodes(),
            self.graph.connections(),
            self.engine.config(),
        );
        serde_json::to_string(&info).map_err(|e| e.to_string())
    }
}

#[wasm_bindgen]
pub struct WasmPatchGraph {
    session: Session,
}

impl Default for WasmPatchGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[wasm_bindgen]
impl WasmPatchGraph {
    #[wasm_bindgen(constructor)]
    pub fn new() -> WasmPatchGraph {
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();
        WasmPatchGraph {
            session: Session::new(EngineConfig::default()),
        }
    }

    /// Replace the engine configuration. Missing fields keep their defaults.
    #[wasm_bindgen]
    pub fn set_config(&mut self, json: &str) -> Result<(), JsValue> {
        self.session.set_config(json).map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn load_graph(&mut self, json: &str) -> Result<(), JsValue> {
        self.session.load_graph(json).map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn snapshot_json(&self) -> Result<String, JsValue> {
        self.session.snapshot_json().map_err(to_js)
    }

    /// Ports of one node as a JS array.
    #[wasm_bindgen]
    pub fn ports(&self, node_id: &str) -> Result<JsValue, JsValue> {
        let node = self
            .session
            .graph
            .node(node_id)
            .ok_or_else(|| JsValue::from_str("unknown node"))?;
        serde_wasm_bindgen::to_value(&node.ports).map_err(|e| JsValue::from_str(&e.to_string()))
    }

    /// Store a connection (JSON) and return the applied mutations as JSON.
    #[wasm_bindgen]
    pub fn connect(&mut self, connection_json: &str) -> Result<String, JsValue> {
        self.session.connect(connection_json).map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn disconnect(&mut self, connection_id: &str) -> Result<String, JsValue> {
        self.session.disconnect(connection_id).map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn resync(&mut self, parent_id: &str) -> Result<String, JsValue> {
        self.session.resync(parent_id).map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn set_port_label(
        &mut self,
        panel_id: &str,
        port_id: &str,
        label: &str,
    ) -> Result<String, JsValue> {
        self.session.set_port_label(panel_id, port_id, label).map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn rename_special_child(&mut self, child_id: &str, name: &str) -> Result<String, JsValue> {
        self.session.rename_special_child(child_id, name).map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn toggle_bundle(&mut self, panel_id: &str, port_id: &str) -> Result<String, JsValue> {
        self.session.toggle_bundle(panel_id, port_id).map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn collapse_bundle(&mut self, panel_id: &str, port_id: &str) -> Result<String, JsValue> {
        self.session.collapse_bundle(panel_id, port_id).map_err(to_js)
    }

    #[wasm_bindgen]
    pub fn detect_bundle(&self, node_id: &str, port_id: &str) -> Result<String, JsValue> {
        self.session.detect_bundle_json(node_id, port_id).map_err(to_js)
    }
}

#[wasm_bindgen]
pub fn is_valid_port_id(id: &str) -> bool {
    patchbay_graph_core::is_valid_port_id(id)
}

#[wasm_bindgen]
pub fn is_valid_composite_port_id(id: &str) -> bool {
    patchbay_graph_core::is_valid_composite_port_id(id)
}

/// Display-only repair of an untrusted id.
#[wasm_bindgen]
pub fn sanitize_port_id(id: &str) -> String {
    patchbay_graph_core::sanitize_port_id(id)
}

/// The default engine configuration as JSON, for tooling/UI.
#[wasm_bindgen]
pub fn default_config_json() -> Result<String, JsValue> {
    serde_json::to_string(&EngineConfig::default()).map_err(|e| JsValue::from_str(&e.to_string()))
}

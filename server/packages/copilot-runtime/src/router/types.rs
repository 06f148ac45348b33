use super::*;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
pub struct AgentInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "type")]
    pub agent_type: String,
}

/// Returned for anything that is not the streaming mutation.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    #[schema(value_type = Vec<Object>)]
    pub actions: Vec<Value>,
    pub agents: Vec<AgentInfo>,
    pub sdk_version: String,
}

impl InfoResponse {
    pub fn from_config(config: &RuntimeConfig) -> Self {
        Self {
            actions: Vec::new(),
            agents: vec![AgentInfo {
                name: config.agent_name.clone(),
                description: config.agent_description.clone(),
                agent_type: AGENT_TYPE.to_string(),
            }],
            sdk_version: config.sdk_version.clone(),
        }
    }
}

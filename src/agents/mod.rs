use std::{collections::HashMap, fmt, sync::Arc};

use tracing::debug;

use crate::{
    config::{AgentPrompts, AppConfig},
    errors::{DecoratorError, Result},
    models::{ClientResponse, ContentBlock},
    providers::{CompletionBackend, OpenAiLikeClient},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentRole {
    ImageValidator,
    TextValidator,
    DecorationDescriber,
    DecorationGenerator,
}

impl AgentRole {
    pub const ALL: [AgentRole; 4] = [
        AgentRole::ImageValidator,
        AgentRole::TextValidator,
        AgentRole::DecorationDescriber,
        AgentRole::DecorationGenerator,
    ];

    pub fn agent_name(&self) -> &'static str {
        match self {
            AgentRole::ImageValidator => "validate_image_agent",
            AgentRole::TextValidator => "validate_text_agent",
            AgentRole::DecorationDescriber => "image_decorator_descriptor_agent",
            AgentRole::DecorationGenerator => "image_decorator_agent",
        }
    }

    fn config_key(&self) -> &'static str {
        match self {
            AgentRole::ImageValidator => "agents.validate_image",
            AgentRole::TextValidator => "agents.validate_text",
            AgentRole::DecorationDescriber => "agents.decorator_descriptor",
            AgentRole::DecorationGenerator => "agents.decorator",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.agent_name())
    }
}

/// A system prompt bound to the client that serves it.
#[derive(Clone)]
pub struct Agent {
    name: String,
    system_prompt: String,
    client: Arc<dyn CompletionBackend>,
}

impl Agent {
    pub fn new(
        name: impl Into<String>,
        system_prompt: impl Into<String>,
        client: Arc<dyn CompletionBackend>,
    ) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            client,
        }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    pub async fn run(&self, task_input: &[ContentBlock]) -> Result<ClientResponse> {
        debug!(
            target: "agent",
            agent = %self.name,
            model = self.client.model(),
            blocks = task_input.len(),
            "running agent"
        );
        self.client.complete(&self.system_prompt, task_input).await
    }
}

/// The four pipeline agents, built once and shared read-only.
pub struct AgentRegistry {
    agents: HashMap<AgentRole, Agent>,
}

impl AgentRegistry {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let vision: Arc<dyn CompletionBackend> =
            Arc::new(OpenAiLikeClient::from_config(&config.vision)?);
        let image: Arc<dyn CompletionBackend> =
            Arc::new(OpenAiLikeClient::from_config(&config.image)?);

        Ok(Self::with_backends(&config.agents, vision, image))
    }

    /// Validators and the describer run on `vision`; the generator runs on `image`.
    pub fn with_backends(
        prompts: &AgentPrompts,
        vision: Arc<dyn CompletionBackend>,
        image: Arc<dyn CompletionBackend>,
    ) -> Self {
        let mut registry = Self::new();
        for role in AgentRole::ALL {
            let (system_prompt, client) = match role {
                AgentRole::ImageValidator => (&prompts.validate_image, vision.clone()),
                AgentRole::TextValidator => (&prompts.validate_text, vision.clone()),
                AgentRole::DecorationDescriber => (&prompts.decorator_descriptor, vision.clone()),
                AgentRole::DecorationGenerator => (&prompts.decorator, image.clone()),
            };
            registry.register(role, Agent::new(role.agent_name(), system_prompt, client));
        }
        registry
    }

    fn new() -> Self {
        Self {
            agents: HashMap::new(),
        }
    }

    fn register(&mut self, role: AgentRole, agent: Agent) {
        self.agents.insert(role, agent);
    }

    pub fn agent(&self, role: AgentRole) -> Result<&Agent> {
        self.agents
            .get(&role)
            .ok_or(DecoratorError::MissingConfig(role.config_key()))
    }

    pub fn overview(&self) -> Vec<(AgentRole, &str)> {
        AgentRole::ALL
            .into_iter()
            .filter_map(|role| self.agents.get(&role).map(|agent| (role, agent.model())))
            .collect()
    }
}

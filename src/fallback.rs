use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::OcrError;
use crate::pipeline::CancelFlag;
use crate::providers::retry::cooldown;
use crate::providers::{
    GenerationOptions, ImagePart, ProviderFuture, ProviderKind, ProviderRegistry, VisionProvider,
    VisionRequest,
};
use crate::settings::ProcessingSettings;
use crate::validate::Reprompt;

/// Lightweight model tried after the configured ones.
pub const LAST_RESORT_MODEL: &str = "gemini-1.5-flash-8b";

/// Which failure of the previous step lets a step run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Initial,
    AnyFailure,
    NonRateLimit,
}

impl Trigger {
    pub fn accepts(&self, previous: &OcrError) -> bool {
        match self {
            Trigger::Initial => false,
            Trigger::AnyFailure => true,
            Trigger::NonRateLimit => !previous.is_rate_limited(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub provider: ProviderKind,
    pub model: String,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.model)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackStep {
    pub route: Route,
    pub trigger: Trigger,
}

/// Ordered `(provider, model)` pairs with the trigger guarding each one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChain {
    steps: Vec<FallbackStep>,
}

impl FallbackChain {
    /// Builds a chain from plain routes: the first runs unconditionally,
    /// later routes on the same provider as their predecessor accept any
    /// failure and a provider switch never follows a rate limit.
    pub fn from_routes(routes: Vec<Route>) -> Self {
        let mut steps: Vec<FallbackStep> = Vec::new();
        for route in routes {
            if route.model.trim().is_empty() || steps.iter().any(|step| step.route == route) {
                continue;
            }
            let trigger = match steps.last() {
                None => Trigger::Initial,
                Some(previous) if previous.route.provider == route.provider => Trigger::AnyFailure,
                Some(_) => Trigger::NonRateLimit,
            };
            steps.push(FallbackStep { route, trigger });
        }
        Self { steps }
    }

    pub fn from_settings(
        settings: &ProcessingSettings,
        registry: &ProviderRegistry,
    ) -> Result<Self, OcrError> {
        let mut routes = Vec::new();
        if registry.contains(ProviderKind::Gemini) {
            for model in [
                settings.primary_model.as_str(),
                settings.fallback_model.as_str(),
                LAST_RESORT_MODEL,
            ] {
                routes.push(Route {
                    provider: ProviderKind::Gemini,
                    model: model.trim().to_string(),
                });
            }
        }
        if registry.contains(ProviderKind::OpenRouter) {
            routes.push(Route {
                provider: ProviderKind::OpenRouter,
                model: settings.alternate_model.trim().to_string(),
            });
        }
        let chain = Self::from_routes(routes);
        if chain.is_empty() {
            return Err(OcrError::MissingCredentials(
                "cloud vision (set GEMINI_API_KEY or OPENROUTER_API_KEY)".to_string(),
            ));
        }
        Ok(chain)
    }

    pub fn steps(&self) -> &[FallbackStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Output of the first route in the chain that answered.
pub struct Generated {
    pub text: String,
    pub route: Route,
    pub provider: Arc<dyn VisionProvider>,
    pub attempts: usize,
    pub failures: Vec<String>,
}

impl fmt::Debug for Generated {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generated")
            .field("route", &self.route)
            .field("attempts", &self.attempts)
            .field("failures", &self.failures)
            .finish()
    }
}

/// One prompt and image sent down the chain.
#[derive(Debug, Clone, Copy)]
pub struct CloudCall<'a> {
    pub system: &'a str,
    pub prompt: &'a str,
    pub image: &'a ImagePart,
    pub options: GenerationOptions,
}

pub struct FallbackController<'a> {
    chain: &'a FallbackChain,
    registry: &'a ProviderRegistry,
    cancel: &'a CancelFlag,
}

impl<'a> FallbackController<'a> {
    pub fn new(
        chain: &'a FallbackChain,
        registry: &'a ProviderRegistry,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            chain,
            registry,
            cancel,
        }
    }

    /// Walks the chain until a route answers. `on_attempt` runs before
    /// every call that is actually made.
    pub async fn generate<F>(&self, call: CloudCall<'_>, mut on_attempt: F) -> Result<Generated, OcrError>
    where
        F: FnMut(&Route),
    {
        let mut failures = Vec::new();
        let mut attempts = 0usize;
        let mut last_error: Option<OcrError> = None;

        for step in self.chain.steps() {
            if let Some(previous) = &last_error
                && !step.trigger.accepts(previous)
            {
                debug!(route = %step.route, "skipping route after {}", previous.kind());
                failures.push(format!("{}: skipped after {}", step.route, previous.kind()));
                continue;
            }
            if self.cancel.is_cancelled() {
                return Err(OcrError::Cancelled);
            }
            let Some(provider) = self.registry.get(step.route.provider) else {
                failures.push(format!("{}: provider not configured", step.route));
                continue;
            };
            if let Some(OcrError::RateLimited {
                provider: limited,
                retry_after,
            }) = &last_error
            {
                cooldown(*limited, *retry_after).await;
                if self.cancel.is_cancelled() {
                    return Err(OcrError::Cancelled);
                }
            }

            attempts += 1;
            on_attempt(&step.route);
            info!(route = %step.route, attempt = attempts, "calling cloud vision model");
            let request = VisionRequest {
                system: call.system,
                prompt: call.prompt,
                image: call.image,
                model: &step.route.model,
                options: call.options,
            };
            match provider.generate(request).await {
                Ok(text) => {
                    return Ok(Generated {
                        text,
                        route: step.route.clone(),
                        provider,
                        attempts,
                        failures,
                    });
                }
                Err(err) => {
                    warn!(route = %step.route, "cloud call failed: {}", err);
                    failures.push(format!("{}: {}", step.route, err));
                    last_error = Some(err);
                }
            }
        }

        Err(OcrError::AllRoutesFailed { attempts: failures })
    }
}

/// Re-prompts go to the model that produced the answer being repaired.
pub struct PinnedRoute<'a> {
    pub provider: Arc<dyn VisionProvider>,
    pub model: String,
    pub system: &'a str,
    pub image: &'a ImagePart,
    pub options: GenerationOptions,
}

impl<'a> PinnedRoute<'a> {
    pub fn from_generated(generated: &Generated, call: CloudCall<'a>) -> Self {
        Self {
            provider: generated.provider.clone(),
            model: generated.route.model.clone(),
            system: call.system,
            image: call.image,
            options: call.options,
        }
    }
}

impl Reprompt for PinnedRoute<'_> {
    fn reprompt<'b>(&'b self, prompt: String) -> ProviderFuture<'b> {
        Box::pin(async move {
            let request = VisionRequest {
                system: self.system,
                prompt: &prompt,
                image: self.image,
                model: &self.model,
                options: self.options,
            };
            self.provider.generate(request).await
        })
    }
}

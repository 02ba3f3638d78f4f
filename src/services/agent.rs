use std::sync::Arc;

use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessage,
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestToolMessage, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, ChatCompletionResponseMessage,
        CreateChatCompletionRequest, Role,
    },
    Client,
};
use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::error::AppError;
use crate::services::tools::{tool_definitions, ToolRouter, PROPER_NOUN_TOOL_NAME};

/// One round-trip to the chat model. The live implementation wraps the
/// OpenAI client; tests substitute scripted responses.
#[async_trait]
pub trait ChatCompleter: Send + Sync {
    async fn complete(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<ChatCompletionResponseMessage, AppError>;
}

pub struct OpenAiChat {
    client: Client<OpenAIConfig>,
}

impl OpenAiChat {
    pub fn new(api_key: &str) -> Self {
        let config = OpenAIConfig::new().with_api_key(api_key);
        Self {
            client: Client::with_config(config),
        }
    }
}

#[async_trait]
impl ChatCompleter for OpenAiChat {
    async fn complete(
        &self,
        request: CreateChatCompletionRequest,
    ) -> Result<ChatCompletionResponseMessage, AppError> {
        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| AppError::Llm(e.to_string()))?;

        Ok(response
            .choices
            .first()
            .ok_or_else(|| AppError::Llm("model returned no choices".to_string()))?
            .message
            .clone())
    }
}

/// Tool-calling loop over the chat API. Holds the registered toolset for
/// the lifetime of the session; each question runs an independent
/// conversation, so concurrent requests share nothing mutable.
pub struct SqlAgent {
    chat: Arc<dyn ChatCompleter>,
    model: String,
    router: ToolRouter,
    max_turns: usize,
}

impl SqlAgent {
    pub fn new(api_key: &str, model: &str, router: ToolRouter, max_turns: usize) -> Self {
        Self::with_completer(Arc::new(OpenAiChat::new(api_key)), model, router, max_turns)
    }

    pub fn with_completer(
        chat: Arc<dyn ChatCompleter>,
        model: &str,
        router: ToolRouter,
        max_turns: usize,
    ) -> Self {
        Self {
            chat,
            model: model.to_string(),
            router,
            max_turns,
        }
    }

    /// One question in, one natural-language answer out. Tool failures are
    /// fed back to the model; only turn exhaustion or a dead model API
    /// surfaces as an error, and the session stays alive for the next call.
    pub async fn answer(&self, question: &str) -> Result<String, AppError> {
        if question.trim().is_empty() {
            return Err(AppError::InvalidInput("empty question".to_string()));
        }

        let mut messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: self.system_prompt(),
                name: None,
                role: Role::System,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(question.to_string()),
                name: None,
                role: Role::User,
            }),
        ];

        for turn in 0..self.max_turns {
            let request = CreateChatCompletionRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: Some(tool_definitions()),
                temperature: Some(0.1),
                ..Default::default()
            };

            let message = self.chat.complete(request).await?;

            match message.tool_calls {
                Some(tool_calls) if !tool_calls.is_empty() => {
                    debug!("Turn {}: {} tool call(s)", turn, tool_calls.len());
                    messages.push(assistant_message(message.content.clone(), tool_calls.clone()));
                    for call in tool_calls {
                        let output = self
                            .router
                            .dispatch(&call.function.name, &call.function.arguments)
                            .await;
                        messages.push(ChatCompletionRequestMessage::Tool(
                            ChatCompletionRequestToolMessage {
                                role: Role::Tool,
                                content: output,
                                tool_call_id: call.id,
                            },
                        ));
                    }
                }
                _ => {
                    let answer = message.content.unwrap_or_default();
                    if answer.is_empty() {
                        return Err(AppError::Agent("model returned no content".to_string()));
                    }
                    info!("Answered after {} turn(s)", turn + 1);
                    return Ok(answer);
                }
            }
        }

        Err(AppError::Agent(format!(
            "no answer after {} turns",
            self.max_turns
        )))
    }

    fn system_prompt(&self) -> String {
        let current_date = Utc::now().format("%Y-%m-%d").to_string();
        format!(
            "You are an agent designed to interact with a PostgreSQL database. Given an input \
             question, create a syntactically correct PostgreSQL query to run, then look at the \
             results of the query and return the answer. Unless the user specifies a specific \
             number of examples they wish to obtain, always limit your query to at most 5 \
             results. Never query for all the columns from a specific table, only ask for the \
             relevant columns given the question.\n\
             You have access to tools for interacting with the database. Only use the information \
             returned by these tools to construct your final answer. You MUST double check your \
             query before executing it. If you get an error while executing a query, rewrite the \
             query and try again.\n\
             DO NOT make any DML statements (INSERT, UPDATE, DELETE, DROP etc.) to the database.\n\
             To start you should ALWAYS look at the tables in the database to see what you can \
             query. Do NOT skip this step. Then you should query the schema of the most relevant \
             tables.\n\
             If you need to filter on a proper noun such as a person, city, or country name, you \
             must ALWAYS first look up the correct spelling using the '{}' tool and filter on one \
             of the values it returns.\n\
             The current date is {}.",
            PROPER_NOUN_TOOL_NAME, current_date
        )
    }
}

fn assistant_message(
    content: Option<String>,
    tool_calls: Vec<ChatCompletionMessageToolCall>,
) -> ChatCompletionRequestMessage {
    #[allow(deprecated)]
    ChatCompletionRequestMessage::Assistant(ChatCompletionRequestAssistantMessage {
        content,
        role: Role::Assistant,
        name: None,
        tool_calls: Some(tool_calls),
        function_call: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_openai::types::{ChatCompletionToolType, FunctionCall};

    use crate::services::db::TextRow;
    use crate::services::index::test_support::CharFreqEmbedder;
    use crate::services::index::MatchIndex;
    use crate::services::tools::SqlBackend;

    struct NoopBackend;

    #[async_trait]
    impl SqlBackend for NoopBackend {
        async fn list_tables(&self) -> Result<Vec<String>, AppError> {
            Ok(vec!["actor".to_string()])
        }
        async fn describe_table(&self, _table: &str) -> Result<String, AppError> {
            Ok(String::new())
        }
        async fn run_query(&self, _sql: &str) -> Result<(Vec<String>, Vec<TextRow>), AppError> {
            Ok((Vec::new(), Vec::new()))
        }
    }

    /// Plays back a fixed script of model replies and records every request
    /// it receives, so tests can assert on the threaded conversation.
    struct ScriptedChat {
        replies: Mutex<Vec<ChatCompletionResponseMessage>>,
        requests: Mutex<Vec<CreateChatCompletionRequest>>,
    }

    impl ScriptedChat {
        fn new(mut replies: Vec<ChatCompletionResponseMessage>) -> Self {
            replies.reverse();
            Self {
                replies: Mutex::new(replies),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        fn request(&self, i: usize) -> CreateChatCompletionRequest {
            self.requests.lock().unwrap()[i].clone()
        }
    }

    #[async_trait]
    impl ChatCompleter for ScriptedChat {
        async fn complete(
            &self,
            request: CreateChatCompletionRequest,
        ) -> Result<ChatCompletionResponseMessage, AppError> {
            self.requests.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AppError::Llm("script exhausted".to_string()))
        }
    }

    #[allow(deprecated)]
    fn reply_with_content(content: &str) -> ChatCompletionResponseMessage {
        ChatCompletionResponseMessage {
            content: Some(content.to_string()),
            tool_calls: None,
            role: Role::Assistant,
            function_call: None,
        }
    }

    #[allow(deprecated)]
    fn reply_with_tool_call(id: &str, name: &str, arguments: &str) -> ChatCompletionResponseMessage {
        ChatCompletionResponseMessage {
            content: None,
            tool_calls: Some(vec![ChatCompletionMessageToolCall {
                id: id.to_string(),
                r#type: ChatCompletionToolType::Function,
                function: FunctionCall {
                    name: name.to_string(),
                    arguments: arguments.to_string(),
                },
            }]),
            role: Role::Assistant,
            function_call: None,
        }
    }

    async fn agent_with_script(
        replies: Vec<ChatCompletionResponseMessage>,
        max_turns: usize,
    ) -> (SqlAgent, Arc<ScriptedChat>) {
        let candidates = vec!["ED CHASE".to_string(), "London".to_string()];
        let index = MatchIndex::build(Arc::new(CharFreqEmbedder), &candidates)
            .await
            .unwrap();
        let router = ToolRouter::new(Arc::new(NoopBackend), Arc::new(index), 3);
        let chat = Arc::new(ScriptedChat::new(replies));
        let agent = SqlAgent::with_completer(chat.clone(), "gpt-4o-mini", router, max_turns);
        (agent, chat)
    }

    fn agent() -> SqlAgent {
        let index = MatchIndex::empty(Arc::new(CharFreqEmbedder));
        let router = ToolRouter::new(Arc::new(NoopBackend), Arc::new(index), 3);
        SqlAgent::new("test-key", "gpt-4o-mini", router, 10)
    }

    #[test]
    fn system_prompt_carries_the_ground_rules() {
        let prompt = agent().system_prompt();
        assert!(prompt.contains("PostgreSQL"));
        assert!(prompt.contains("DO NOT make any DML statements"));
        assert!(prompt.contains(PROPER_NOUN_TOOL_NAME));
        assert!(prompt.contains("at most 5"));
    }

    #[tokio::test]
    async fn empty_question_is_rejected_before_any_model_call() {
        let result = agent().answer("   ").await;
        assert!(matches!(result, Err(AppError::InvalidInput(_))));
    }

    #[tokio::test]
    async fn tool_call_round_trip_threads_messages_and_returns_answer() {
        let (agent, chat) = agent_with_script(
            vec![
                reply_with_tool_call("call_1", PROPER_NOUN_TOOL_NAME, r#"{"search": "Ed Chse"}"#),
                reply_with_content("There is 1 actor named ED CHASE."),
            ],
            10,
        )
        .await;

        let answer = agent
            .answer("How many people named Ed Chase are there in the actor table?")
            .await
            .unwrap();
        assert_eq!(answer, "There is 1 actor named ED CHASE.");
        assert_eq!(chat.request_count(), 2);

        // Second request carries the assistant tool call and its tool reply.
        let followup = chat.request(1);
        assert_eq!(followup.messages.len(), 4);
        match &followup.messages[2] {
            ChatCompletionRequestMessage::Assistant(assistant) => {
                let calls = assistant.tool_calls.as_ref().unwrap();
                assert_eq!(calls[0].id, "call_1");
                assert_eq!(calls[0].function.name, PROPER_NOUN_TOOL_NAME);
            }
            other => panic!("expected assistant message, got {:?}", other),
        }
        match &followup.messages[3] {
            ChatCompletionRequestMessage::Tool(tool) => {
                assert_eq!(tool.tool_call_id, "call_1");
                assert!(tool.content.contains("ED CHASE"));
            }
            other => panic!("expected tool message, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn turn_exhaustion_yields_agent_error() {
        let replies: Vec<_> = (0..3)
            .map(|i| reply_with_tool_call(&format!("call_{}", i), "list_tables", "{}"))
            .collect();
        let (agent, chat) = agent_with_script(replies, 3).await;

        let result = agent.answer("How many actors are there?").await;
        assert!(matches!(result, Err(AppError::Agent(_))));
        assert_eq!(chat.request_count(), 3);
    }

    #[tokio::test]
    async fn empty_content_without_tool_calls_is_no_answer() {
        let (agent, _) = agent_with_script(vec![reply_with_content("")], 10).await;
        // An all-empty reply means the model produced nothing usable.
        let result = agent.answer("How many actors are there?").await;
        assert!(matches!(result, Err(AppError::Agent(_))));
    }

    #[tokio::test]
    async fn model_failure_propagates_without_panicking() {
        let (agent, _) = agent_with_script(Vec::new(), 10).await;
        let result = agent.answer("How many actors are there?").await;
        assert!(matches!(result, Err(AppError::Llm(_))));
    }
}

pub mod llm_config_route;
pub mod pipeline_config_route;

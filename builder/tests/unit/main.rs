mod fixtures;
mod test_pipeline;

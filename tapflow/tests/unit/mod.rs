mod fakes;
mod test_channel;
mod test_executor;
mod test_fsm;
mod test_orchestrator;
mod test_recording;
mod test_server;

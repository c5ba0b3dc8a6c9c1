use super::Session;
use crate::error::HarnessResult;
use crate::model::Endpoint;
use crate::supervisor::Instance;

/// The supervised process's own stdin/stdout.
#[derive(Debug)]
pub struct LocalSession<'a> {
    instance: &'a Instance,
    endpoint: Endpoint,
    offset: usize,
}

impl<'a> LocalSession<'a> {
    pub fn new(instance: &'a Instance) -> Self {
        Self {
            instance,
            endpoint: Endpoint::local_console(),
            offset: 0,
        }
    }
}

impl Session for LocalSession<'_> {
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn write_line(&mut self, line: &str) -> HarnessResult<()> {
        self.instance.write_stdin_line(line)
    }

    fn read_available(&mut self) -> HarnessResult<Vec<u8>> {
        let chunk = self.instance.output().read_from(self.offset)?;
        self.offset += chunk.len();
        Ok(chunk)
    }

    fn is_closed(&self) -> bool {
        self.instance.output().is_closed()
    }

    fn describe(&self) -> String {
        format!("console (pid {})", self.instance.pid())
    }
}

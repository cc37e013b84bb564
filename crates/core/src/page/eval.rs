//! JavaScript evaluation methods for [`Page`].

use cdp_runtime::Result;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::Page;
use crate::execution_context::{ExecutionContext, World};

impl Page {
	/// Evaluates `expression` in the main world of the main frame.
	///
	/// Waits (up to the page default timeout) for the context if the frame is
	/// between documents. Promises are awaited; the result is returned by value.
	pub async fn evaluate(&self, expression: &str) -> Result<Value> {
		self.main_context(World::Main).await?.evaluate(expression).await
	}

	/// Evaluates `expression` and deserializes the result to `T`.
	pub async fn evaluate_typed<T: DeserializeOwned>(&self, expression: &str) -> Result<T> {
		let value = self.evaluate(expression).await?;
		Ok(serde_json::from_value(value)?)
	}

	/// Calls a function declaration in the main world with JSON arguments.
	pub async fn call_function(&self, declaration: &str, args: Vec<Value>) -> Result<Value> {
		self.main_context(World::Main)
			.await?
			.call_function(declaration, args)
			.await
	}

	/// Evaluates `expression` in the isolated utility world, hidden from page scripts.
	pub async fn evaluate_isolated(&self, expression: &str) -> Result<Value> {
		self.main_context(World::utility()).await?.evaluate(expression).await
	}

	async fn main_context(&self, world: World) -> Result<ExecutionContext> {
		let frame = self.main_frame()?;
		self.frame_manager
			.wait_for_execution_context(&frame, world, self.options.default_timeout)
			.await
	}
}

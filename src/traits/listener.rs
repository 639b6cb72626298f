/// Observer of the render thread lifecycle. Both callbacks run on the render thread.
pub trait RendererListener: Send + Sync {
    /// GPU setup finished; layer surfaces are available and content may start
    fn on_ready(&self);

    /// The thread has terminated and every GPU resource is released
    fn on_finished(&self);
}

use crate::core::Canvas;
use crate::error::Result;

/// Producer of one layer's pixels.
///
/// `refresh` is called from the refresh driver's thread with a cleared canvas
/// sized to the layer's content; whatever it draws is posted to the layer.
pub trait LayerContent: Send {
    fn refresh(&mut self, canvas: &mut Canvas) -> Result<()>;
}

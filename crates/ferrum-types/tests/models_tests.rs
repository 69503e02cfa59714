use ferrum_types::*;

#[test]
fn model_type_parse_and_display() {
    assert_eq!("decoder_only".parse::<ModelType>().unwrap(), ModelType::DecoderOnly);
    assert_eq!("encoder-decoder".parse::<ModelType>().unwrap(), ModelType::EncoderDecoder);
    assert_eq!("Encoder".parse::<ModelType>().unwrap(), ModelType::EncoderOnly);
    assert!("rnn".parse::<ModelType>().is_err());
    assert_eq!(ModelType::EncoderDecoder.to_string(), "encoder_decoder");
}

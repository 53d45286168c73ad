use crate::message::{Frame, FrameError, Message, Tag, FRAME_LEN};

#[test]
pub fn frame_layout() {
    let frame = Message::WriteGrant {
        sender: 3,
        slot: 0x0102,
    }
    .encode(7)
    .unwrap();

    let mut expected = [0u8; FRAME_LEN];
    expected[0] = 4;
    expected[1] = 7;
    expected[5] = 3;
    expected[9] = 0x02;
    expected[10] = 0x01;

    assert_eq!(frame.as_bytes(), &expected);
    assert_eq!(frame.round(), 7);
    assert_eq!(frame.sender(), 3);
    assert_eq!(frame.payload(), 0x0102);
}

#[test]
pub fn decode_keeps_kind_and_payload() {
    let messages = [
        Message::JoinNotify { sender: 2 },
        Message::CoordinatorAssign {
            sender: 5,
            coordinator: 1,
        },
        Message::WriteDone { sender: 4, slot: 1 },
    ];

    for message in messages {
        let frame = message.encode(1).unwrap();

        assert_eq!(frame.tag_byte(), message.tag() as u8);
        assert_eq!(Message::decode(&frame), Ok(message));
    }
}

#[test]
pub fn decode_rejects_unknown_tag() {
    let mut bytes = *Message::JoinNotify { sender: 1 }
        .encode(0)
        .unwrap()
        .as_bytes();
    bytes[0] = 9;

    assert_eq!(
        Message::decode(&Frame::from_bytes(bytes)),
        Err(FrameError::UnknownTag(9))
    );
}

#[test]
pub fn sender_must_fit_the_frame() {
    let sender = u32::MAX as usize + 1;

    assert_eq!(
        Message::WriteDone { sender, slot: 0 }.encode(0),
        Err(FrameError::SenderOverflow(sender))
    );
    assert!(Message::WriteDone {
        sender: u32::MAX as usize,
        slot: 0
    }
    .encode(0)
    .is_ok());
}

#[test]
pub fn tag_names() {
    assert_eq!(Tag::Decider.to_string(), "DECIDER");
    assert_eq!(Tag::Coordinator.to_string(), "COORDINATOR");
    assert_eq!(Tag::Done.to_string(), "DONE");
    assert_eq!(Tag::Grant.to_string(), "GRANT");
    assert_eq!(Tag::try_from(3), Ok(Tag::Done));
}
